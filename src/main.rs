use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use talkback::app::{fetch_clip, http_service, load_config, poll_once, run_pipeline, upload_file};
use talkback::cli::{Cli, Commands, ConfigAction, RunArgs};
use talkback::config::Config;
use talkback::service::PollResult;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match &cli.command {
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "talkback",
                &mut std::io::stdout(),
            );
            return Ok(());
        }
        Some(Commands::Config {
            action: ConfigAction::Path,
        }) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            println!("{}", path.display());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(cli.config.as_deref(), cli.server, cli.device_id)
        .context("failed to load configuration")?;

    match cli.command {
        None => run(config, RunArgs::default()).await?,
        Some(Commands::Run(args)) => run(config, args).await?,
        Some(Commands::Fetch { audio_id, output }) => {
            let service = http_service(&config)?;
            let path = fetch_clip(&service, &config, &audio_id, output)
                .await
                .with_context(|| format!("failed to fetch {audio_id}"))?;
            println!("{}", path.display());
        }
        Some(Commands::Upload { file }) => {
            let service = http_service(&config)?;
            let receipt = upload_file(&service, &config, &file)
                .await
                .with_context(|| format!("failed to upload {}", file.display()))?;
            match receipt.text {
                Some(text) => println!("{text}"),
                None => eprintln!("Uploaded, no transcription returned"),
            }
        }
        Some(Commands::Poll) => {
            let service = http_service(&config)?;
            match poll_once(&service).await? {
                PollResult::Found(audio_id) => println!("{audio_id}"),
                PollResult::NotFound => eprintln!("No audio pending"),
            }
        }
        Some(Commands::Config {
            action: ConfigAction::Show,
        }) => print!("{}", config.to_toml()?),
        Some(Commands::Config {
            action: ConfigAction::Path,
        })
        | Some(Commands::Completions { .. }) => {}
    }

    Ok(())
}

async fn run(config: Config, args: RunArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
        on_signal.cancel();
    });

    run_pipeline(config, args, cancel).await?;
    Ok(())
}

/// Logs go to stderr so `--play-to -` can stream PCM on stdout.
/// `RUST_LOG` takes precedence over `-q`/`-v`.
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("talkback={}", cli.log_directive())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

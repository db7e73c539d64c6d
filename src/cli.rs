//! Command-line interface for talkback
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Poll, play and record audio against a speech service
#[derive(Parser, Debug)]
#[command(
    name = "talkback",
    version,
    about = "Poll, play and record audio against a speech service"
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Service base URL (overrides config and TALKBACK_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// Device identifier sent to the service
    #[arg(long, global = true, value_name = "ID")]
    pub device_id: Option<String>,
}

/// Options of the `run` command
#[derive(clap::Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Write device-rate PCM here instead of discarding it ("-" for stdout)
    #[arg(long, value_name = "PATH")]
    pub play_to: Option<PathBuf>,

    /// Feed capture from a WAV file instead of leaving it idle
    #[arg(long, value_name = "WAV")]
    pub capture_from: Option<PathBuf>,

    /// Disable capture and upload entirely
    #[arg(long, conflicts_with = "capture_from")]
    pub no_capture: bool,

    /// Pace playback and capture at real time, like a hardware device
    #[arg(long)]
    pub realtime: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline until Ctrl-C
    Run(RunArgs),

    /// Download one clip by id
    Fetch {
        /// Audio id as returned by the poll endpoint
        audio_id: String,

        /// Output file; `.wav` writes a WAV file, anything else raw PCM (default: <id>.pcm)
        #[arg(long, short = 'o', value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Upload a recording and print the transcription
    Upload {
        /// Raw 16-bit mono PCM at the service rate, or a WAV file
        file: PathBuf,
    },

    /// Poll once and print the outcome
    Poll,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

impl Cli {
    /// Maps `-q`/`-v` to a tracing filter directive.
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

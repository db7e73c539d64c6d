//! Command implementations.
//!
//! Wires the config, the HTTP service and the host audio stand-ins into the
//! pipeline, and implements the one-shot `fetch`, `upload` and `poll` commands.

use crate::audio::bridge::{extend_le_bytes, samples_from_le_bytes};
use crate::audio::{
    AudioSink, AudioSource, BufferConfig, DownloadBuffer, NullSink, PcmWriterSink, WavAudioSource,
    wav,
};
use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::{Result, TalkbackError};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::service::{AudioService, HttpAudioService, PollResult, UploadReceipt};
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Loads the configuration file (or defaults), then applies environment and
/// command-line overrides, in that order, and validates the result.
pub fn load_config(
    path: Option<&Path>,
    server: Option<String>,
    device_id: Option<String>,
) -> Result<Config> {
    let mut config = match path {
        // An explicit path must exist
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    }
    .with_env_overrides();

    if let Some(server) = server {
        config.service.base_url = server;
    }
    if let Some(device_id) = device_id {
        config.service.device_id = device_id;
    }

    config.validate()?;
    Ok(config)
}

/// Runs the full pipeline until `cancel` fires.
pub async fn run_pipeline(config: Config, args: RunArgs, cancel: CancellationToken) -> Result<()> {
    let service: Arc<dyn AudioService> = Arc::new(HttpAudioService::new(&config.service)?);
    let sink = open_sink(&config, &args)?;
    let source = open_source(&config, &args)?;

    tracing::info!(
        version = %crate::version_string(),
        server = %config.service.base_url,
        upload = %config.service.upload_base(),
        device_id = %config.service.device_id,
        capture = source.is_some(),
        "starting pipeline"
    );

    let handle = Pipeline::new(PipelineConfig::from_config(&config))
        .with_cancellation(cancel.clone())
        .start(service, sink, source)?;

    cancel.cancelled().await;
    tracing::info!("shutting down");
    handle.stop().await;
    Ok(())
}

/// Chooses the playback sink: a PCM writer when `--play-to` is given,
/// otherwise a sink that discards audio.
pub fn open_sink(config: &Config, args: &RunArgs) -> Result<Box<dyn AudioSink>> {
    let Some(path) = &args.play_to else {
        return Ok(Box::new(NullSink));
    };
    let rate = config.audio.device_sample_rate;
    let channels = config.audio.device_channels;

    if path.as_os_str() == "-" {
        let sink = PcmWriterSink::new(std::io::stdout());
        return Ok(if args.realtime {
            Box::new(sink.with_realtime(rate, channels))
        } else {
            Box::new(sink)
        });
    }

    let sink = PcmWriterSink::new(BufWriter::new(File::create(path)?));
    Ok(if args.realtime {
        Box::new(sink.with_realtime(rate, channels))
    } else {
        Box::new(sink)
    })
}

/// Chooses the capture source, or `None` when capture is off.
pub fn open_source(config: &Config, args: &RunArgs) -> Result<Option<Box<dyn AudioSource>>> {
    if args.no_capture || !config.audio.capture_enabled {
        return Ok(None);
    }
    let Some(path) = &args.capture_from else {
        tracing::debug!("no capture source configured, running playback only");
        return Ok(None);
    };

    let source = WavAudioSource::from_path(
        path,
        config.audio.device_sample_rate,
        config.audio.device_channels,
    )?;
    tracing::info!(path = %path.display(), samples = source.len(), "capturing from WAV file");
    Ok(Some(if args.realtime {
        Box::new(source.with_realtime())
    } else {
        Box::new(source)
    }))
}

/// Downloads one clip and writes it to `output` (default `<id>.pcm`).
///
/// Returns the path written.
pub async fn fetch_clip(
    service: &dyn AudioService,
    config: &Config,
    audio_id: &str,
    output: Option<PathBuf>,
) -> Result<PathBuf> {
    let mut buffer = DownloadBuffer::new(BufferConfig {
        initial_bytes: config.buffer.initial_bytes,
        growth_bytes: config.buffer.growth_bytes,
        max_bytes: config.buffer.max_bytes,
    });
    service.download(audio_id, &mut buffer).await?;
    if buffer.is_truncated() {
        tracing::warn!(bytes = buffer.len(), "clip truncated at the buffer cap");
    }

    let path = output.unwrap_or_else(|| PathBuf::from(format!("{audio_id}.pcm")));
    if is_wav(&path) {
        let mut samples = Vec::new();
        samples_from_le_bytes(buffer.as_bytes(), &mut samples);
        wav::write_mono(&path, &samples, config.audio.service_sample_rate)?;
    } else {
        std::fs::write(&path, buffer.as_bytes())?;
    }
    tracing::info!(path = %path.display(), bytes = buffer.len(), "clip saved");
    Ok(path)
}

/// Reads a recording for upload: WAV files are converted to service-rate
/// mono PCM16, anything else is sent as raw PCM.
pub fn read_upload_payload(path: &Path, service_rate: u32) -> Result<Vec<u8>> {
    if is_wav(path) {
        let file = File::open(path)?;
        let samples = wav::read_mono(Box::new(std::io::BufReader::new(file)), service_rate)?;
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        extend_le_bytes(&samples, &mut pcm);
        return Ok(pcm);
    }

    let mut pcm = Vec::new();
    File::open(path)?.read_to_end(&mut pcm)?;
    if pcm.len() % 2 != 0 {
        return Err(TalkbackError::AudioFormatMismatch {
            expected: "whole 16-bit samples".to_string(),
            actual: format!("{} bytes", pcm.len()),
        });
    }
    Ok(pcm)
}

/// Uploads one recording file.
pub async fn upload_file(
    service: &dyn AudioService,
    config: &Config,
    path: &Path,
) -> Result<UploadReceipt> {
    let pcm = read_upload_payload(path, config.audio.service_sample_rate)?;
    if pcm.is_empty() {
        return Err(TalkbackError::Upload {
            message: format!("{} holds no audio", path.display()),
        });
    }
    service.upload(&pcm).await
}

/// Polls once.
pub async fn poll_once(service: &dyn AudioService) -> Result<PollResult> {
    service.poll().await
}

/// Builds the HTTP service for the one-shot commands.
pub fn http_service(config: &Config) -> Result<HttpAudioService> {
    HttpAudioService::new(&config.service)
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

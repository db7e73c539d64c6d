use crate::defaults;
use crate::error::{Result, TalkbackError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub buffer: BufferSection,
    pub retry: RetryConfig,
}

/// Remote service endpoints and identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL for `/poll` and `/audio/<id>.pcm`
    pub base_url: String,
    /// Base URL for `/upload`; falls back to `base_url`
    pub upload_base_url: Option<String>,
    pub device_id: String,
    pub poll_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Prefix of uploaded file names
    pub upload_prefix: String,
}

/// Sample formats on both sides of the bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AudioConfig {
    pub service_sample_rate: u32,
    pub device_sample_rate: u32,
    pub device_channels: u16,
    pub playback_chunk_bytes: usize,
    pub capture_chunk_frames: usize,
    pub capture_enabled: bool,
}

/// Voice-activity segmentation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VadConfig {
    pub threshold: u32,
    pub silence_timeout_ms: u32,
    pub min_duration_ms: u32,
    pub recording_capacity_bytes: usize,
}

/// Download buffer sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BufferSection {
    pub initial_bytes: usize,
    pub growth_bytes: usize,
    pub max_bytes: usize,
}

/// Retry, backoff and pacing delays
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
    pub idle_delay_ms: u64,
    pub post_playback_delay_ms: u64,
    pub sink_write_retries: u32,
    pub sink_retry_delay_ms: u64,
    pub source_read_retries: u32,
    pub upload_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::SERVER_URL.to_string(),
            upload_base_url: None,
            device_id: defaults::DEVICE_ID.to_string(),
            poll_timeout_secs: defaults::POLL_TIMEOUT_SECS,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            upload_prefix: defaults::UPLOAD_PREFIX.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Base URL uploads go to.
    pub fn upload_base(&self) -> &str {
        self.upload_base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.base_url)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            service_sample_rate: defaults::SERVICE_SAMPLE_RATE,
            device_sample_rate: defaults::DEVICE_SAMPLE_RATE,
            device_channels: defaults::DEVICE_CHANNELS,
            playback_chunk_bytes: defaults::PLAYBACK_CHUNK_BYTES,
            capture_chunk_frames: defaults::CAPTURE_CHUNK_FRAMES,
            capture_enabled: true,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::VAD_THRESHOLD,
            silence_timeout_ms: defaults::SILENCE_TIMEOUT_MS,
            min_duration_ms: defaults::MIN_UTTERANCE_MS,
            recording_capacity_bytes: defaults::RECORDING_CAPACITY_BYTES,
        }
    }
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            initial_bytes: defaults::DOWNLOAD_INITIAL_BYTES,
            growth_bytes: defaults::DOWNLOAD_GROWTH_BYTES,
            max_bytes: defaults::DOWNLOAD_MAX_BYTES,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: defaults::INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::MAX_BACKOFF_MS,
            max_attempts: defaults::MAX_RETRY_ATTEMPTS,
            idle_delay_ms: defaults::IDLE_DELAY_MS,
            post_playback_delay_ms: defaults::POST_PLAYBACK_DELAY_MS,
            sink_write_retries: defaults::SINK_WRITE_RETRIES,
            sink_retry_delay_ms: defaults::SINK_RETRY_DELAY_MS,
            source_read_retries: defaults::SOURCE_READ_RETRIES,
            upload_retries: defaults::UPLOAD_RETRIES,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> TalkbackError {
    TalkbackError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TalkbackError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                TalkbackError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(TalkbackError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TALKBACK_SERVER_URL → service.base_url
    /// - TALKBACK_UPLOAD_URL → service.upload_base_url
    /// - TALKBACK_DEVICE_ID → service.device_id
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("TALKBACK_SERVER_URL")
            && !url.is_empty()
        {
            self.service.base_url = url;
        }

        if let Ok(url) = std::env::var("TALKBACK_UPLOAD_URL")
            && !url.is_empty()
        {
            self.service.upload_base_url = Some(url);
        }

        if let Ok(device_id) = std::env::var("TALKBACK_DEVICE_ID")
            && !device_id.is_empty()
        {
            self.service.device_id = device_id;
        }

        self
    }

    /// Checks values that would otherwise fail deep inside the pipeline.
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.service_sample_rate == 0
            || audio.device_sample_rate % audio.service_sample_rate != 0
            || audio.device_sample_rate == 0
        {
            return Err(invalid(
                "audio.device_sample_rate",
                format!(
                    "{} Hz is not an integer multiple of the service rate {} Hz",
                    audio.device_sample_rate, audio.service_sample_rate
                ),
            ));
        }
        if !(1..=2).contains(&audio.device_channels) {
            return Err(invalid("audio.device_channels", "must be 1 or 2"));
        }
        if audio.playback_chunk_bytes < 2 || audio.playback_chunk_bytes % 2 != 0 {
            return Err(invalid(
                "audio.playback_chunk_bytes",
                "must be a positive even number (whole PCM16 samples)",
            ));
        }
        let ratio = (audio.device_sample_rate / audio.service_sample_rate) as usize;
        if audio.capture_chunk_frames == 0 || audio.capture_chunk_frames % ratio != 0 {
            return Err(invalid(
                "audio.capture_chunk_frames",
                format!("must be a positive multiple of the rate ratio {ratio}"),
            ));
        }

        if self.vad.recording_capacity_bytes < 2 {
            return Err(invalid("vad.recording_capacity_bytes", "must hold at least one sample"));
        }

        let buffer = &self.buffer;
        if buffer.growth_bytes == 0 {
            return Err(invalid("buffer.growth_bytes", "must be positive"));
        }
        if buffer.max_bytes == 0 || buffer.initial_bytes > buffer.max_bytes {
            return Err(invalid(
                "buffer.max_bytes",
                "must be positive and at least buffer.initial_bytes",
            ));
        }

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(invalid(
                "retry.max_backoff_ms",
                "must be at least retry.initial_backoff_ms",
            ));
        }

        let service = &self.service;
        if service.device_id.trim().is_empty() {
            return Err(invalid("service.device_id", "must not be empty"));
        }
        for (key, url) in [
            ("service.base_url", Some(service.base_url.as_str())),
            ("service.upload_base_url", service.upload_base_url.as_deref()),
        ] {
            if let Some(url) = url
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                return Err(invalid(key, format!("{url:?} is not an http(s) URL")));
            }
        }
        Ok(())
    }

    /// Serializes the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TalkbackError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/talkback/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("talkback")
            .join("config.toml")
    }
}

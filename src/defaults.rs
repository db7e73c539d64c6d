//! Default configuration constants for talkback.
//!
//! Shared by the config file layer, the pipeline configs and the CLI so the
//! values stay consistent.

/// Default service base URL for polling and clip downloads.
pub const SERVER_URL: &str = "http://192.168.32.177:8001";

/// Default device identifier sent in `X-Device-ID` and the upload form.
pub const DEVICE_ID: &str = "ESP32_VOICE_01";

/// Prefix of uploaded recording file names (`<prefix>_<device>_<timestamp>.pcm`).
pub const UPLOAD_PREFIX: &str = "esp32";

/// Long-poll timeout in seconds.
///
/// The service holds `/poll` for up to ~30 s; the client waits a little
/// longer so a server-side timeout answers before ours fires.
pub const POLL_TIMEOUT_SECS: u64 = 35;

/// Timeout for downloads and uploads in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Sample rate of downloaded clips and uploaded recordings in Hz.
pub const SERVICE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of the hardware sink/source in Hz.
pub const DEVICE_SAMPLE_RATE: u32 = 48000;

/// Interleaved channel count of the hardware sink/source.
pub const DEVICE_CHANNELS: u16 = 2;

/// Source bytes consumed per sink write.
///
/// 341 mono samples at 16 kHz become 1023 frames at 48 kHz, which fills one
/// 1023-frame DMA descriptor.
pub const PLAYBACK_CHUNK_BYTES: usize = 682;

/// Interleaved frames requested per source read. A multiple of the 3:1
/// rate ratio, so decimation never straddles two reads.
pub const CAPTURE_CHUNK_FRAMES: usize = 1023;

/// Mean-absolute-amplitude at or above which a capture chunk counts as voiced.
pub const VAD_THRESHOLD: u32 = 500;

/// Trailing silence that ends an utterance, in milliseconds.
pub const SILENCE_TIMEOUT_MS: u32 = 3000;

/// Utterances shorter than this are discarded instead of uploaded, in milliseconds.
pub const MIN_UTTERANCE_MS: u32 = 500;

/// Capacity of one recording session buffer (≈32 s at 16 kHz mono).
pub const RECORDING_CAPACITY_BYTES: usize = 1024 * 1024;

/// Initial download buffer capacity.
pub const DOWNLOAD_INITIAL_BYTES: usize = 64 * 1024;

/// Download buffer growth step.
pub const DOWNLOAD_GROWTH_BYTES: usize = 64 * 1024;

/// Hard cap of a download buffer; larger clips are truncated.
pub const DOWNLOAD_MAX_BYTES: usize = 4 * 1024 * 1024;

/// First delay after a transport error, in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Ceiling of the exponential backoff, in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Consecutive transport failures before the orchestrator logs an outage and
/// restarts the backoff sequence.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Pause after a `204 No Content` poll, in milliseconds.
pub const IDLE_DELAY_MS: u64 = 100;

/// Settle time after a clip finishes before polling again, in milliseconds.
pub const POST_PLAYBACK_DELAY_MS: u64 = 1000;

/// Retries of one sink write before the clip is abandoned.
pub const SINK_WRITE_RETRIES: u32 = 5;

/// Pause between sink write retries, in milliseconds.
pub const SINK_RETRY_DELAY_MS: u64 = 10;

/// Consecutive source read failures before capture escalates and cools down.
pub const SOURCE_READ_RETRIES: u32 = 10;

/// Extra upload attempts after the first failure.
pub const UPLOAD_RETRIES: u32 = 1;

/// Bytes per multipart body chunk when uploading a recording.
pub const UPLOAD_CHUNK_BYTES: usize = 4096;

/// Number of finished utterances that may queue for upload.
pub const UPLOAD_QUEUE_DEPTH: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_rate_is_integer_multiple_of_service_rate() {
        assert_eq!(DEVICE_SAMPLE_RATE % SERVICE_SAMPLE_RATE, 0);
    }

    #[test]
    fn capture_chunk_is_whole_service_samples() {
        let ratio = (DEVICE_SAMPLE_RATE / SERVICE_SAMPLE_RATE) as usize;
        assert_eq!(CAPTURE_CHUNK_FRAMES % ratio, 0);
    }

    #[test]
    fn playback_chunk_is_whole_samples() {
        assert_eq!(PLAYBACK_CHUNK_BYTES % 2, 0);
    }

    #[test]
    fn download_bounds_are_ordered() {
        assert!(DOWNLOAD_INITIAL_BYTES <= DOWNLOAD_MAX_BYTES);
        assert!(DOWNLOAD_GROWTH_BYTES > 0);
    }
}

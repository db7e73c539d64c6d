//! Remote audio service: poll for work, download clips, upload recordings.

pub mod protocol;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpAudioService;
pub use protocol::{PollResult, UploadReceipt};

use crate::audio::DownloadBuffer;
use crate::error::{Result, TalkbackError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Trait for the remote service.
///
/// This trait allows swapping implementations (real HTTP vs mock).
#[async_trait]
pub trait AudioService: Send + Sync {
    /// Long-polls for the next clip.
    async fn poll(&self) -> Result<PollResult>;

    /// Streams the clip's bytes into `buffer`.
    ///
    /// A full buffer is not an error: the download stops and the clip is
    /// playable up to what was captured.
    async fn download(&self, audio_id: &str, buffer: &mut DownloadBuffer) -> Result<()>;

    /// Uploads one recording of service-rate PCM16.
    async fn upload(&self, pcm: &[u8]) -> Result<UploadReceipt>;
}

#[async_trait]
impl<T: AudioService + ?Sized> AudioService for Arc<T> {
    async fn poll(&self) -> Result<PollResult> {
        (**self).poll().await
    }

    async fn download(&self, audio_id: &str, buffer: &mut DownloadBuffer) -> Result<()> {
        (**self).download(audio_id, buffer).await
    }

    async fn upload(&self, pcm: &[u8]) -> Result<UploadReceipt> {
        (**self).upload(pcm).await
    }
}

/// Appends a chunk to the download buffer, returning `false` once the buffer
/// is full and the rest of the stream should be skipped.
pub(crate) fn append_chunk(buffer: &mut DownloadBuffer, chunk: &[u8]) -> bool {
    match buffer.append(chunk) {
        Ok(accepted) if accepted == chunk.len() => true,
        Ok(_) | Err(TalkbackError::BufferFull { .. }) => {
            tracing::warn!(
                bytes = buffer.len(),
                "download exceeds buffer cap, truncating clip"
            );
            false
        }
        Err(_) => false,
    }
}

/// Scripted poll outcome for [`MockAudioService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockPoll {
    Found(String),
    NotFound,
    /// Connection failure.
    TransportError,
    /// `200` with a body lacking `audio_id`.
    Malformed,
}

#[derive(Debug, Default)]
struct MockState {
    polls: VecDeque<MockPoll>,
    clips: HashMap<String, Vec<u8>>,
    uploads: Vec<Vec<u8>>,
    poll_count: usize,
    download_count: usize,
    upload_attempts: usize,
    upload_failures: usize,
    transcription: Option<String>,
    echo_device_id: Option<String>,
}

/// Mock service for testing
///
/// Serves scripted poll outcomes (then `NotFound` forever), canned clips and
/// records every upload.
#[derive(Debug, Default)]
pub struct MockAudioService {
    state: Mutex<MockState>,
    poll_delay: Duration,
    download_chunk: usize,
}

impl MockAudioService {
    /// Create a mock that never has work
    pub fn new() -> Self {
        Self {
            download_chunk: 1024,
            ..Self::default()
        }
    }

    /// Queue a poll outcome
    pub fn with_poll(self, poll: MockPoll) -> Self {
        self.lock().polls.push_back(poll);
        self
    }

    /// Serve `bytes` for `audio_id`
    pub fn with_clip(self, audio_id: &str, bytes: Vec<u8>) -> Self {
        self.lock().clips.insert(audio_id.to_string(), bytes);
        self
    }

    /// Fail the first `count` uploads
    pub fn with_upload_failures(self, count: usize) -> Self {
        self.lock().upload_failures = count;
        self
    }

    /// Transcription returned by successful uploads
    pub fn with_transcription(self, text: &str) -> Self {
        self.lock().transcription = Some(text.to_string());
        self
    }

    /// Device id echoed in upload receipts
    pub fn with_echo_device_id(self, device_id: &str) -> Self {
        self.lock().echo_device_id = Some(device_id.to_string());
        self
    }

    /// Delay every poll (emulates the long poll)
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Number of polls served
    pub fn poll_count(&self) -> usize {
        self.lock().poll_count
    }

    /// Number of downloads started
    pub fn download_count(&self) -> usize {
        self.lock().download_count
    }

    /// Number of upload calls, failed ones included
    pub fn upload_attempts(&self) -> usize {
        self.lock().upload_attempts
    }

    /// Bodies of successful uploads
    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.lock().uploads.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AudioService for MockAudioService {
    async fn poll(&self) -> Result<PollResult> {
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let next = {
            let mut state = self.lock();
            state.poll_count += 1;
            state.polls.pop_front().unwrap_or(MockPoll::NotFound)
        };
        match next {
            MockPoll::Found(id) => Ok(PollResult::Found(id)),
            MockPoll::NotFound => Ok(PollResult::NotFound),
            MockPoll::TransportError => Err(TalkbackError::Transport {
                message: "mock connection refused".to_string(),
            }),
            MockPoll::Malformed => protocol::classify_poll(200, "mock://poll", b"{}"),
        }
    }

    async fn download(&self, audio_id: &str, buffer: &mut DownloadBuffer) -> Result<()> {
        let clip = {
            let mut state = self.lock();
            state.download_count += 1;
            state.clips.get(audio_id).cloned()
        };
        let Some(bytes) = clip else {
            return Err(TalkbackError::HttpStatus {
                status: 404,
                url: protocol::audio_url("mock://", audio_id),
            });
        };

        buffer.reserve_total(bytes.len());
        for chunk in bytes.chunks(self.download_chunk.max(1)) {
            if !append_chunk(buffer, chunk) {
                break;
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn upload(&self, pcm: &[u8]) -> Result<UploadReceipt> {
        let mut state = self.lock();
        state.upload_attempts += 1;
        if state.upload_failures > 0 {
            state.upload_failures -= 1;
            return Err(TalkbackError::Upload {
                message: "mock upload failure".to_string(),
            });
        }
        state.uploads.push(pcm.to_vec());
        Ok(UploadReceipt {
            text: state.transcription.clone(),
            device_id: state.echo_device_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferConfig;

    #[tokio::test]
    async fn test_mock_serves_script_then_idles() {
        let service = MockAudioService::new()
            .with_poll(MockPoll::Found("abc123".to_string()))
            .with_poll(MockPoll::TransportError);

        assert_eq!(
            service.poll().await.unwrap(),
            PollResult::Found("abc123".to_string())
        );
        assert!(service.poll().await.unwrap_err().is_transient());
        assert_eq!(service.poll().await.unwrap(), PollResult::NotFound);
        assert_eq!(service.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_malformed_poll_is_parse_error() {
        let service = MockAudioService::new().with_poll(MockPoll::Malformed);
        let err = service.poll().await.unwrap_err();
        assert!(matches!(err, TalkbackError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_mock_download_fills_buffer() {
        let bytes: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let service = MockAudioService::new().with_clip("abc", bytes.clone());
        let mut buffer = DownloadBuffer::new(BufferConfig::default());

        service.download("abc", &mut buffer).await.unwrap();
        assert_eq!(buffer.as_bytes(), bytes.as_slice());
        assert_eq!(service.download_count(), 1);
    }

    #[tokio::test]
    async fn test_download_truncates_at_cap() {
        let service = MockAudioService::new().with_clip("big", vec![1u8; 5000]);
        let mut buffer = DownloadBuffer::new(BufferConfig {
            initial_bytes: 1024,
            growth_bytes: 1024,
            max_bytes: 3000,
        });

        service.download("big", &mut buffer).await.unwrap();
        assert_eq!(buffer.len(), 3000);
        assert!(buffer.is_truncated());
    }

    #[tokio::test]
    async fn test_mock_download_unknown_clip() {
        let service = MockAudioService::new();
        let mut buffer = DownloadBuffer::new(BufferConfig::default());
        let err = service.download("nope", &mut buffer).await.unwrap_err();
        assert!(matches!(err, TalkbackError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_mock_upload_failures_then_success() {
        let service = MockAudioService::new()
            .with_upload_failures(1)
            .with_transcription("hello");

        assert!(service.upload(b"pcm").await.is_err());
        let receipt = service.upload(b"pcm").await.unwrap();
        assert_eq!(receipt.text.as_deref(), Some("hello"));
        assert_eq!(service.upload_attempts(), 2);
        assert_eq!(service.uploads(), vec![b"pcm".to_vec()]);
    }

    #[tokio::test]
    async fn test_arc_service_delegates() {
        let service: Arc<dyn AudioService> = Arc::new(MockAudioService::new());
        assert_eq!(service.poll().await.unwrap(), PollResult::NotFound);
    }
}

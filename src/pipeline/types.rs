//! Data types handed between the pipeline tasks.

use crate::audio::DownloadBuffer;
use crate::pipeline::error::StationError;
use std::fmt;

/// Lifecycle of an [`AudioClip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipState {
    /// No work yet.
    Empty,
    /// Bytes are being fetched into a download buffer.
    Downloading,
    /// Download finished; waiting for the sink.
    Ready,
    /// Being drained into the sink.
    Playing,
    /// Fully played (or abandoned); the buffer has been released.
    Done,
}

impl fmt::Display for ClipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClipState::Empty => "empty",
            ClipState::Downloading => "downloading",
            ClipState::Ready => "ready",
            ClipState::Playing => "playing",
            ClipState::Done => "done",
        };
        f.write_str(name)
    }
}

/// One playable unit of downloaded PCM.
///
/// Owns its bytes outright: the download buffer is moved in, and the bytes
/// are dropped when the clip reaches [`ClipState::Done`].
#[derive(Debug)]
pub struct AudioClip {
    id: String,
    bytes: Vec<u8>,
    total: usize,
    position: usize,
    truncated: bool,
    state: ClipState,
}

impl AudioClip {
    /// Builds a `Ready` clip from a finished download.
    pub fn from_download(id: impl Into<String>, buffer: DownloadBuffer) -> Self {
        let truncated = buffer.is_truncated();
        let bytes = buffer.into_bytes();
        Self {
            id: id.into(),
            total: bytes.len(),
            bytes,
            position: 0,
            truncated,
            state: ClipState::Ready,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ClipState {
        self.state
    }

    /// Total bytes in the clip (fixed once downloaded).
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Source bytes already written to the sink.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns true if the download hit the buffer cap.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// `Ready -> Playing`.
    pub fn start_playing(&mut self) {
        debug_assert_eq!(self.state, ClipState::Ready);
        self.state = ClipState::Playing;
    }

    /// The next slice of at most `chunk_bytes` at the read position, or
    /// `None` at the end of the clip.
    pub fn next_chunk(&self, chunk_bytes: usize) -> Option<&[u8]> {
        if self.position >= self.bytes.len() {
            return None;
        }
        let end = (self.position + chunk_bytes.max(1)).min(self.bytes.len());
        Some(&self.bytes[self.position..end])
    }

    /// Moves the read position forward by consumed source bytes.
    pub fn advance(&mut self, source_bytes: usize) {
        self.position = (self.position + source_bytes).min(self.bytes.len());
    }

    /// Percentage of the clip played so far.
    pub fn progress_percent(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        (self.position as u64 * 100 / self.total as u64) as u32
    }

    /// `-> Done`, releasing the byte buffer.
    pub fn finish(&mut self) {
        self.bytes = Vec::new();
        self.state = ClipState::Done;
    }
}

/// Segmentation state of a [`RecordingSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Idle,
    Voiced,
    TrailingSilence,
}

/// One captured utterance at the service rate.
///
/// The buffer is allocated once at full capacity and reused through
/// [`RecordingSession::into_buffer`] once the session has been uploaded or
/// discarded.
#[derive(Debug)]
pub struct RecordingSession {
    buffer: Vec<u8>,
    capacity: usize,
    sample_rate: u32,
    elapsed_samples: u64,
    silence_samples: u64,
    overflowed: bool,
    state: SegmentState,
}

impl RecordingSession {
    /// Starts a session in `Idle`, reusing `buffer`'s allocation.
    pub fn with_buffer(mut buffer: Vec<u8>, capacity: usize, sample_rate: u32) -> Self {
        buffer.clear();
        if buffer.capacity() < capacity {
            buffer.reserve_exact(capacity);
        }
        Self {
            buffer,
            capacity,
            sample_rate,
            elapsed_samples: 0,
            silence_samples: 0,
            overflowed: false,
            state: SegmentState::Idle,
        }
    }

    /// Appends PCM16 bytes; accounts the duration even when the bytes no longer fit.
    pub(crate) fn append(&mut self, bytes: &[u8], samples: usize) {
        let room = self.capacity.saturating_sub(self.buffer.len());
        if bytes.len() > room {
            if !self.overflowed {
                tracing::warn!(
                    capacity = self.capacity,
                    "recording buffer full, dropping further audio"
                );
            }
            self.overflowed = true;
        }
        self.buffer.extend_from_slice(&bytes[..bytes.len().min(room)]);
        self.elapsed_samples += samples as u64;
    }

    pub(crate) fn set_state(&mut self, state: SegmentState) {
        self.state = state;
    }

    pub(crate) fn reset_silence(&mut self) {
        self.silence_samples = 0;
    }

    pub(crate) fn add_silence(&mut self, samples: usize) -> u64 {
        self.silence_samples += samples as u64;
        self.silence_samples
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Recorded PCM16 little-endian bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Duration of all appended audio, including audio dropped on overflow.
    pub fn duration_ms(&self) -> u32 {
        samples_to_ms(self.elapsed_samples, self.sample_rate)
    }

    /// Duration of the current run of trailing silence.
    pub fn silence_ms(&self) -> u32 {
        samples_to_ms(self.silence_samples, self.sample_rate)
    }

    /// Returns true if audio was dropped because the buffer was full.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Releases the buffer for reuse.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

pub(crate) fn samples_to_ms(samples: u64, sample_rate: u32) -> u32 {
    (samples * 1000 / sample_rate.max(1) as u64) as u32
}

/// Request handed from the orchestrator to the playback thread.
#[derive(Debug)]
pub struct PlaybackRequest {
    pub clip: AudioClip,
    pub done: tokio::sync::oneshot::Sender<PlaybackReport>,
}

/// Outcome of one clip's playback.
#[derive(Debug, Clone)]
pub struct PlaybackReport {
    pub audio_id: String,
    /// Source bytes written to the sink.
    pub bytes_played: usize,
    /// Successful sink writes.
    pub writes: usize,
    /// `Some` when the clip was abandoned.
    pub error: Option<StationError>,
}

/// Observable pipeline milestones.
///
/// Sent with `try_send` on an optional channel; observers that fall behind
/// lose events rather than stalling the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A poll found no work.
    PollIdle,
    /// A clip changed lifecycle state.
    Clip { audio_id: String, state: ClipState },
    /// One chunk was written to the sink.
    ChunkPlayed {
        audio_id: String,
        source_bytes: usize,
        device_samples: usize,
    },
    /// A download failed and was discarded.
    DownloadFailed { audio_id: String, message: String },
    /// Playback gave up on a clip.
    ClipAbandoned { audio_id: String, message: String },
    /// The segmenter finished an utterance long enough to upload.
    UtteranceEmitted { bytes: usize, duration_ms: u32 },
    /// The segmenter dropped an utterance shorter than the minimum.
    UtteranceDiscarded { duration_ms: u32 },
    /// An utterance was uploaded.
    UploadFinished { bytes: usize, text: Option<String> },
    /// An utterance could not be uploaded after retries.
    UploadFailed { message: String },
}

/// Optional, lossy event stream shared by the pipeline tasks.
#[derive(Debug, Clone, Default)]
pub struct EventSender(Option<crossbeam_channel::Sender<PipelineEvent>>);

impl EventSender {
    pub fn new(tx: Option<crossbeam_channel::Sender<PipelineEvent>>) -> Self {
        Self(tx)
    }

    /// Sends without blocking; a full or closed channel drops the event.
    pub fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.0
            && tx.try_send(event).is_err()
        {
            tracing::trace!("event channel full or closed, dropping event");
        }
    }

    pub fn clip(&self, audio_id: &str, state: ClipState) {
        tracing::debug!(audio_id, %state, "clip state");
        self.send(PipelineEvent::Clip {
            audio_id: audio_id.to_string(),
            state,
        });
    }
}

//! Streaming audio pipeline.
//!
//! Three activities share the work: an async orchestrator (poll, download,
//! upload), a playback thread draining clips into the sink and a capture
//! thread segmenting the microphone stream. They hand buffers to each other
//! by value over channels; nothing is shared mutably.

pub mod capture;
pub mod duplex;
pub mod error;
pub mod orchestrator;
pub mod playback;
pub mod retry;
pub mod segmenter;
pub mod types;

pub use capture::CaptureStation;
pub use duplex::HalfDuplex;
pub use error::{ErrorReporter, LogReporter, StationError};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineHandle};
pub use playback::PlaybackStation;
pub use retry::{Backoff, BackoffPolicy, BackoffStep};
pub use segmenter::{SegmentOutcome, Segmenter, SegmenterConfig};
pub use types::{
    AudioClip, ClipState, EventSender, PipelineEvent, PlaybackReport, PlaybackRequest,
    RecordingSession, SegmentState,
};

//! Audio primitives: download buffering, rate bridging, levels and the
//! device seam.

pub mod bridge;
pub mod buffer;
pub mod device;
pub mod level;
pub mod wav;

pub use bridge::SampleBridge;
pub use buffer::{BufferConfig, DownloadBuffer};
pub use device::{AudioSink, AudioSource, MockSink, MockSource, NullSink, PcmWriterSink, SinkRecord};
pub use wav::WavAudioSource;

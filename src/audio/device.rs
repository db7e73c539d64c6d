//! Audio sink/source abstraction over the codec and I2S driver.
//!
//! The hardware layer is an external collaborator: everything the pipeline
//! needs is a blocking `write_samples`/`read_samples` pair whose blocking is
//! bounded by a timeout chosen by the implementation.

use crate::error::{Result, TalkbackError};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Trait for audio output devices.
///
/// This trait allows swapping implementations (real I2S channel vs mock).
pub trait AudioSink: Send {
    /// Write interleaved device-rate samples.
    ///
    /// Blocks until the device accepted the samples or the implementation's
    /// write timeout expired (reported as `SinkWrite`).
    fn write_samples(&mut self, buffer: &[i16]) -> Result<()>;

    /// Flush anything buffered by the implementation.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Trait for audio input devices.
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read interleaved device-rate samples into `buffer`.
    ///
    /// Returns the number of samples written. Zero means nothing arrived
    /// before the read timeout (or a finite source is exhausted).
    fn read_samples(&mut self, buffer: &mut [i16]) -> Result<usize>;

    /// Returns true if this source ends (a file) rather than streaming forever.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Sink that writes little-endian PCM16 to any writer (file, stdout).
///
/// With pacing enabled each write blocks until the audio it carries would
/// have finished playing, which emulates the I2S DMA back-pressure.
pub struct PcmWriterSink<W: Write + Send> {
    writer: W,
    pacing: Option<Pacing>,
    scratch: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct Pacing {
    samples_per_sec: u64,
    started: Option<Instant>,
    samples_written: u64,
}

impl<W: Write + Send> PcmWriterSink<W> {
    /// Creates an unpaced sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pacing: None,
            scratch: Vec::new(),
        }
    }

    /// Paces writes at `sample_rate` frames per second of `channels` samples each.
    pub fn with_realtime(mut self, sample_rate: u32, channels: u16) -> Self {
        self.pacing = Some(Pacing {
            samples_per_sec: sample_rate as u64 * channels as u64,
            started: None,
            samples_written: 0,
        });
        self
    }
}

impl<W: Write + Send> AudioSink for PcmWriterSink<W> {
    fn write_samples(&mut self, buffer: &[i16]) -> Result<()> {
        self.scratch.clear();
        crate::audio::bridge::extend_le_bytes(buffer, &mut self.scratch);
        self.writer
            .write_all(&self.scratch)
            .map_err(|e| TalkbackError::SinkWrite {
                message: e.to_string(),
            })?;

        if let Some(pacing) = self.pacing.as_mut() {
            let started = *pacing.started.get_or_insert_with(Instant::now);
            pacing.samples_written += buffer.len() as u64;
            let due = Duration::from_micros(
                pacing.samples_written * 1_000_000 / pacing.samples_per_sec.max(1),
            );
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(pacing) = self.pacing.as_mut() {
            pacing.started = None;
            pacing.samples_written = 0;
        }
        self.writer.flush().map_err(|e| TalkbackError::SinkWrite {
            message: e.to_string(),
        })
    }
}

/// Sink that discards everything. Used when playback output is not wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write_samples(&mut self, _buffer: &[i16]) -> Result<()> {
        Ok(())
    }
}

/// Shared view of what a [`MockSink`] received, readable after the sink
/// moved into the playback thread.
#[derive(Debug, Clone, Default)]
pub struct SinkRecord {
    writes: Arc<Mutex<Vec<Vec<i16>>>>,
    attempts: Arc<AtomicUsize>,
}

impl SinkRecord {
    /// Lengths of successful writes in order.
    pub fn write_lengths(&self) -> Vec<usize> {
        self.lock().iter().map(Vec::len).collect()
    }

    /// Concatenation of all successfully written samples.
    pub fn samples(&self) -> Vec<i16> {
        self.lock().concat()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of write calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<i16>>> {
        self.writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Mock sink for testing
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    record: SinkRecord,
    failures_left: usize,
    always_fail: bool,
    write_delay: Duration,
}

impl MockSink {
    /// Create a mock sink that accepts every write
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` write calls
    pub fn with_failures(mut self, count: usize) -> Self {
        self.failures_left = count;
        self
    }

    /// Fail every write call
    pub fn with_permanent_failure(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Block each write for `delay` (emulates DMA timing)
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Handle for inspecting writes from another thread
    pub fn record(&self) -> SinkRecord {
        self.record.clone()
    }
}

impl AudioSink for MockSink {
    fn write_samples(&mut self, buffer: &[i16]) -> Result<()> {
        self.record.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }
        if self.always_fail || self.failures_left > 0 {
            self.failures_left = self.failures_left.saturating_sub(1);
            return Err(TalkbackError::SinkWrite {
                message: "mock sink failure".to_string(),
            });
        }
        self.record.lock().push(buffer.to_vec());
        Ok(())
    }
}

/// Mock source for testing: replays scripted chunks.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    chunks: Vec<Vec<i16>>,
    position: usize,
    looping: bool,
    failures_left: usize,
    read_delay: Duration,
    reads: Arc<AtomicUsize>,
}

impl MockSource {
    /// Create a mock source that returns `chunks` in order, then nothing
    pub fn new(chunks: Vec<Vec<i16>>) -> Self {
        Self {
            chunks,
            ..Self::default()
        }
    }

    /// Restart from the first chunk after the last one
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Fail the first `count` reads
    pub fn with_failures(mut self, count: usize) -> Self {
        self.failures_left = count;
        self
    }

    /// Block each read for `delay` (emulates the DMA read timeout)
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Counter of read calls, shared with clones
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

impl AudioSource for MockSource {
    fn read_samples(&mut self, buffer: &mut [i16]) -> Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(TalkbackError::SourceRead {
                message: "mock source failure".to_string(),
            });
        }
        if self.position >= self.chunks.len() {
            if !self.looping || self.chunks.is_empty() {
                return Ok(0);
            }
            self.position = 0;
        }
        let chunk = &self.chunks[self.position];
        self.position += 1;
        let count = chunk.len().min(buffer.len());
        buffer[..count].copy_from_slice(&chunk[..count]);
        Ok(count)
    }

    fn is_finite(&self) -> bool {
        !self.looping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_writer_sink_writes_little_endian() {
        let mut out = Vec::new();
        {
            let mut sink = PcmWriterSink::new(&mut out);
            sink.write_samples(&[1, -2]).unwrap();
            sink.flush().unwrap();
        }
        assert_eq!(out, vec![0x01, 0x00, 0xfe, 0xff]);
    }

    #[test]
    fn test_paced_sink_blocks_for_audio_duration() {
        let mut sink = PcmWriterSink::new(std::io::sink()).with_realtime(1000, 1);
        let start = Instant::now();
        // 50 samples at 1 kHz mono = 50 ms
        sink.write_samples(&[0; 50]).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_mock_sink_records_writes() {
        let mut sink = MockSink::new();
        let record = sink.record();
        sink.write_samples(&[1, 2, 3]).unwrap();
        sink.write_samples(&[4]).unwrap();

        assert_eq!(record.write_lengths(), vec![3, 1]);
        assert_eq!(record.samples(), vec![1, 2, 3, 4]);
        assert_eq!(record.attempts(), 2);
    }

    #[test]
    fn test_mock_sink_transient_failures() {
        let mut sink = MockSink::new().with_failures(2);
        let record = sink.record();
        assert!(sink.write_samples(&[1]).is_err());
        assert!(sink.write_samples(&[1]).is_err());
        assert!(sink.write_samples(&[1]).is_ok());
        assert_eq!(record.attempts(), 3);
        assert_eq!(record.write_count(), 1);
    }

    #[test]
    fn test_mock_source_replays_then_runs_dry() {
        let mut source = MockSource::new(vec![vec![1, 2], vec![3]]);
        let mut buffer = [0i16; 4];

        assert_eq!(source.read_samples(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], &[1, 2]);
        assert_eq!(source.read_samples(&mut buffer).unwrap(), 1);
        assert_eq!(source.read_samples(&mut buffer).unwrap(), 0);
        assert!(source.is_finite());
    }

    #[test]
    fn test_mock_source_looping_and_failures() {
        let mut source = MockSource::new(vec![vec![9]]).looping().with_failures(1);
        let counter = source.read_counter();
        let mut buffer = [0i16; 1];

        assert!(source.read_samples(&mut buffer).is_err());
        assert_eq!(source.read_samples(&mut buffer).unwrap(), 1);
        assert_eq!(source.read_samples(&mut buffer).unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!source.is_finite());
    }
}

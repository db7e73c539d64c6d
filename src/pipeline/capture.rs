//! Capture station: microphone stream -> segmenter -> upload queue.
//!
//! Runs on its own thread because source reads block on the device. Each
//! read happens inside a capture turn of the half-duplex gate, so nothing is
//! recorded while a clip is playing.

use crate::audio::level::volume_dbfs;
use crate::audio::{AudioSource, SampleBridge};
use crate::defaults;
use crate::error::Result;
use crate::pipeline::duplex::HalfDuplex;
use crate::pipeline::error::{ErrorReporter, LogReporter, StationError};
use crate::pipeline::segmenter::{SegmentOutcome, Segmenter};
use crate::pipeline::types::{EventSender, PipelineEvent, RecordingSession};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

const STATION: &str = "capture";

/// How long to wait for a capture turn while playback is active.
const TURN_WAIT: Duration = Duration::from_millis(100);

/// Sleep after an empty read from a live source.
const EMPTY_READ_SLEEP: Duration = Duration::from_millis(10);

/// Sleep after a failed read.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Cool-down after the read retries are exhausted.
const READ_COOLDOWN: Duration = Duration::from_secs(1);

/// Reads the source, runs the bridge in reverse and feeds the segmenter.
pub struct CaptureStation {
    source: Box<dyn AudioSource>,
    bridge: SampleBridge,
    segmenter: Segmenter,
    duplex: Arc<HalfDuplex>,
    chunk_frames: usize,
    read_retries: u32,
    events: EventSender,
    reporter: Arc<dyn ErrorReporter>,
}

impl CaptureStation {
    pub fn new(
        source: Box<dyn AudioSource>,
        bridge: SampleBridge,
        segmenter: Segmenter,
        duplex: Arc<HalfDuplex>,
    ) -> Self {
        let chunk_frames = whole_ratio_frames(defaults::CAPTURE_CHUNK_FRAMES, bridge.ratio());
        Self {
            source,
            bridge,
            segmenter,
            duplex,
            chunk_frames,
            read_retries: defaults::SOURCE_READ_RETRIES,
            events: EventSender::default(),
            reporter: Arc::new(LogReporter),
        }
    }

    /// Interleaved frames requested per read, rounded down to a multiple
    /// of the rate ratio so no read ends partway through a service sample.
    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = whole_ratio_frames(frames, self.bridge.ratio());
        self
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Consecutive failed reads tolerated before escalating.
    pub fn with_read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Spawns the capture thread.
    ///
    /// Finished utterances go to `uploads`; uploaded buffers come back on
    /// `recycled`. The thread exits on cancellation or when a finite source
    /// runs dry, flushing any open utterance first.
    pub fn spawn(
        self,
        uploads: mpsc::Sender<RecordingSession>,
        recycled: Receiver<Vec<u8>>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("talkback-capture".to_string())
            .spawn(move || self.run(&uploads, &recycled, &cancel))?;
        Ok(handle)
    }

    fn run(
        mut self,
        uploads: &mpsc::Sender<RecordingSession>,
        recycled: &Receiver<Vec<u8>>,
        cancel: &CancellationToken,
    ) {
        if let Err(e) = self.source.start() {
            self.reporter.report(
                STATION,
                &StationError::Fatal(format!("failed to start audio source: {e}")),
            );
            return;
        }

        let channels = self.bridge.device_channels();
        let mut interleaved = vec![0i16; self.chunk_frames * channels];
        let mut scratch = Vec::new();
        let mut mono = Vec::new();
        let mut failures: u32 = 0;
        let finite = self.source.is_finite();

        while !cancel.is_cancelled() {
            for buffer in recycled.try_iter() {
                self.segmenter.recycle(buffer);
            }

            let Some(turn) = self.duplex.try_begin_capture(TURN_WAIT) else {
                continue;
            };
            let read = self.source.read_samples(&mut interleaved);
            drop(turn);

            match read {
                Ok(0) if finite => {
                    tracing::debug!("audio source exhausted");
                    break;
                }
                Ok(0) => thread::sleep(EMPTY_READ_SLEEP),
                Ok(count) => {
                    failures = 0;
                    self.bridge
                        .from_device(&interleaved[..count], &mut scratch, &mut mono);
                    let outcome = self.segmenter.process(&mono);
                    let volume = self.segmenter.last_volume();
                    tracing::trace!(volume, dbfs = volume_dbfs(volume), "capture chunk");
                    self.dispatch(outcome, uploads);
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.read_retries {
                        self.reporter.report(
                            STATION,
                            &StationError::Fatal(format!(
                                "audio source failed {failures} times in a row: {e}"
                            )),
                        );
                        failures = 0;
                        thread::sleep(READ_COOLDOWN);
                    } else {
                        tracing::warn!(attempt = failures, error = %e, "source read failed");
                        thread::sleep(READ_RETRY_DELAY);
                    }
                }
            }
        }

        let outcome = self.segmenter.finish();
        self.dispatch(outcome, uploads);

        if let Err(e) = self.source.stop() {
            tracing::warn!(error = %e, "failed to stop audio source");
        }
        tracing::debug!("capture thread exiting");
    }

    fn dispatch(&mut self, outcome: SegmentOutcome, uploads: &mpsc::Sender<RecordingSession>) {
        match outcome {
            SegmentOutcome::Continue => {}
            SegmentOutcome::Discarded { duration_ms } => {
                self.events
                    .send(PipelineEvent::UtteranceDiscarded { duration_ms });
            }
            SegmentOutcome::Emitted(session) => {
                self.events.send(PipelineEvent::UtteranceEmitted {
                    bytes: session.len(),
                    duration_ms: session.duration_ms(),
                });
                match uploads.try_send(session) {
                    Ok(()) => {}
                    Err(TrySendError::Full(session)) => {
                        tracing::warn!(
                            duration_ms = session.duration_ms(),
                            "upload queue full, dropping utterance"
                        );
                        self.segmenter.recycle(session.into_buffer());
                    }
                    Err(TrySendError::Closed(session)) => {
                        self.segmenter.recycle(session.into_buffer());
                    }
                }
            }
        }
    }
}

/// Largest multiple of `ratio` not above `frames`, and at least one `ratio`.
fn whole_ratio_frames(frames: usize, ratio: usize) -> usize {
    let ratio = ratio.max(1);
    (frames / ratio).max(1) * ratio
}

//! Playback station: drains one clip at a time into the audio sink.
//!
//! Runs on its own thread because sink writes block on the device. Clips
//! arrive over a single-slot channel together with a oneshot sender that
//! reports completion back to the orchestrator.

use crate::audio::bridge::samples_from_le_bytes;
use crate::audio::{AudioSink, SampleBridge};
use crate::defaults;
use crate::error::Result;
use crate::pipeline::duplex::HalfDuplex;
use crate::pipeline::error::{ErrorReporter, LogReporter, StationError};
use crate::pipeline::types::{
    AudioClip, ClipState, EventSender, PipelineEvent, PlaybackReport, PlaybackRequest,
};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STATION: &str = "playback";

/// How often an idle playback thread checks for shutdown.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Drains clips through the sample bridge into the sink.
pub struct PlaybackStation {
    sink: Box<dyn AudioSink>,
    bridge: SampleBridge,
    duplex: Arc<HalfDuplex>,
    chunk_bytes: usize,
    write_retries: u32,
    retry_delay: Duration,
    service_rate: u32,
    events: EventSender,
    reporter: Arc<dyn ErrorReporter>,
    mono: Vec<i16>,
    scratch: Vec<i16>,
    device: Vec<i16>,
}

impl PlaybackStation {
    pub fn new(sink: Box<dyn AudioSink>, bridge: SampleBridge, duplex: Arc<HalfDuplex>) -> Self {
        Self {
            sink,
            bridge,
            duplex,
            chunk_bytes: defaults::PLAYBACK_CHUNK_BYTES,
            write_retries: defaults::SINK_WRITE_RETRIES,
            retry_delay: Duration::from_millis(defaults::SINK_RETRY_DELAY_MS),
            service_rate: defaults::SERVICE_SAMPLE_RATE,
            events: EventSender::default(),
            reporter: Arc::new(LogReporter),
            mono: Vec::new(),
            scratch: Vec::new(),
            device: Vec::new(),
        }
    }

    /// Source bytes per sink write (rounded down to whole samples).
    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = (chunk_bytes & !1).max(2);
        self
    }

    /// Bounded retries of one failed write, `delay` apart.
    pub fn with_write_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.write_retries = retries;
        self.retry_delay = delay;
        self
    }

    /// Service sample rate, used for progress reporting.
    pub fn with_service_rate(mut self, rate: u32) -> Self {
        self.service_rate = rate;
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

    /// Spawns the playback thread.
    ///
    /// The thread exits when `cancel` fires or every request sender is dropped.
    pub fn spawn(
        mut self,
        requests: Receiver<PlaybackRequest>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("talkback-playback".to_string())
            .spawn(move || {
                while !cancel.is_cancelled() {
                    match requests.recv_timeout(IDLE_POLL) {
                        Ok(request) => {
                            let report = self.play(request.clip, &cancel);
                            if request.done.send(report).is_err() {
                                tracing::debug!("playback report dropped, orchestrator gone");
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("playback thread exiting");
            })?;
        Ok(handle)
    }

    /// Plays one clip to completion (or abandonment) while holding the
    /// playback turn.
    pub fn play(&mut self, mut clip: AudioClip, cancel: &CancellationToken) -> PlaybackReport {
        // The turn borrows the gate, not the station, so writes can take `&mut self`
        let duplex = Arc::clone(&self.duplex);
        let _turn = duplex.begin_playback();
        let audio_id = clip.id().to_string();

        clip.start_playing();
        self.events.clip(&audio_id, ClipState::Playing);
        tracing::info!(
            audio_id = %audio_id,
            bytes = clip.total_bytes(),
            truncated = clip.is_truncated(),
            "playback started"
        );

        // Roughly one progress line per second of audio
        let progress_step = (self.service_rate as usize * 2).max(1);
        let mut next_progress = progress_step;
        let mut writes = 0;
        let mut error = None;

        while let Some(chunk) = clip.next_chunk(self.chunk_bytes) {
            if cancel.is_cancelled() {
                error = Some(StationError::Recoverable("shutdown during playback".to_string()));
                break;
            }

            let source_bytes = chunk.len();
            samples_from_le_bytes(chunk, &mut self.mono);
            self.bridge
                .to_device(&self.mono, &mut self.scratch, &mut self.device);

            if let Err(e) = self.write_with_retry() {
                self.reporter.report(STATION, &e);
                self.events.send(PipelineEvent::ClipAbandoned {
                    audio_id: audio_id.clone(),
                    message: e.to_string(),
                });
                error = Some(e);
                break;
            }
            writes += 1;
            clip.advance(source_bytes);
            self.events.send(PipelineEvent::ChunkPlayed {
                audio_id: audio_id.clone(),
                source_bytes,
                device_samples: self.device.len(),
            });

            if clip.position() >= next_progress {
                next_progress += progress_step;
                tracing::debug!(
                    audio_id = %audio_id,
                    percent = clip.progress_percent(),
                    "playback progress"
                );
            }
        }

        if let Err(e) = self.sink.flush() {
            tracing::warn!(error = %e, "sink flush failed");
        }

        let bytes_played = clip.position();
        clip.finish();
        self.events.clip(&audio_id, ClipState::Done);
        if error.is_none() {
            tracing::info!(audio_id = %audio_id, bytes = bytes_played, writes, "playback finished");
        }

        PlaybackReport {
            audio_id,
            bytes_played,
            writes,
            error,
        }
    }

    fn write_with_retry(&mut self) -> std::result::Result<(), StationError> {
        let mut attempt = 0;
        loop {
            match self.sink.write_samples(&self.device) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.write_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "sink write failed, retrying");
                    thread::sleep(self.retry_delay);
                }
                Err(e) => {
                    return Err(StationError::Fatal(format!(
                        "sink write failed after {} attempts: {}",
                        attempt + 1,
                        e
                    )));
                }
            }
        }
    }
}

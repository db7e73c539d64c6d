//! Fetch/upload orchestrator and the handle that owns the running pipeline.
//!
//! ```text
//!   poll ──Found──▶ download ──AudioClip──▶ playback thread ──▶ sink
//!    ▲                                             │
//!    └──────────── completion (oneshot) ◀──────────┘
//!
//!   source ──▶ capture thread (bridge + segmenter) ──session──▶ uploader task
//!                        ▲                                          │
//!                        └──────────── recycled buffer ◀───────────┘
//! ```

use crate::audio::{AudioSink, AudioSource, BufferConfig, DownloadBuffer, SampleBridge};
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::pipeline::capture::CaptureStation;
use crate::pipeline::duplex::HalfDuplex;
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::playback::PlaybackStation;
use crate::pipeline::retry::{Backoff, BackoffPolicy, BackoffStep};
use crate::pipeline::segmenter::{Segmenter, SegmenterConfig};
use crate::pipeline::types::{
    AudioClip, ClipState, EventSender, PipelineEvent, PlaybackRequest, RecordingSession,
};
use crate::service::{AudioService, PollResult};
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// How long `stop()` waits for each task before giving up on it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub service_sample_rate: u32,
    pub device_sample_rate: u32,
    pub device_channels: u16,
    /// Source bytes per sink write
    pub playback_chunk_bytes: usize,
    /// Interleaved frames per source read
    pub capture_chunk_frames: usize,
    pub segmenter: SegmenterConfig,
    pub buffer: BufferConfig,
    pub backoff: BackoffPolicy,
    /// Pause after a poll without work
    pub idle_delay: Duration,
    /// Pause after a clip finished before polling again
    pub post_playback_delay: Duration,
    pub sink_write_retries: u32,
    pub sink_retry_delay: Duration,
    pub source_read_retries: u32,
    /// Extra upload attempts after a failure
    pub upload_retries: u32,
    /// Finished utterances that may wait for upload
    pub upload_queue_depth: usize,
    /// Device id expected in upload receipts
    pub device_id: String,
    /// Optional event sender for observers (crossbeam, non-blocking)
    pub event_tx: Option<crossbeam_channel::Sender<PipelineEvent>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service_sample_rate: defaults::SERVICE_SAMPLE_RATE,
            device_sample_rate: defaults::DEVICE_SAMPLE_RATE,
            device_channels: defaults::DEVICE_CHANNELS,
            playback_chunk_bytes: defaults::PLAYBACK_CHUNK_BYTES,
            capture_chunk_frames: defaults::CAPTURE_CHUNK_FRAMES,
            segmenter: SegmenterConfig::default(),
            buffer: BufferConfig::default(),
            backoff: BackoffPolicy::default(),
            idle_delay: Duration::from_millis(defaults::IDLE_DELAY_MS),
            post_playback_delay: Duration::from_millis(defaults::POST_PLAYBACK_DELAY_MS),
            sink_write_retries: defaults::SINK_WRITE_RETRIES,
            sink_retry_delay: Duration::from_millis(defaults::SINK_RETRY_DELAY_MS),
            source_read_retries: defaults::SOURCE_READ_RETRIES,
            upload_retries: defaults::UPLOAD_RETRIES,
            upload_queue_depth: defaults::UPLOAD_QUEUE_DEPTH,
            device_id: defaults::DEVICE_ID.to_string(),
            event_tx: None,
        }
    }
}

impl PipelineConfig {
    /// Builds the runtime configuration from the file configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            service_sample_rate: config.audio.service_sample_rate,
            device_sample_rate: config.audio.device_sample_rate,
            device_channels: config.audio.device_channels,
            playback_chunk_bytes: config.audio.playback_chunk_bytes,
            capture_chunk_frames: config.audio.capture_chunk_frames,
            segmenter: SegmenterConfig {
                threshold: config.vad.threshold,
                silence_timeout_ms: config.vad.silence_timeout_ms,
                min_duration_ms: config.vad.min_duration_ms,
                capacity_bytes: config.vad.recording_capacity_bytes,
                sample_rate: config.audio.service_sample_rate,
            },
            buffer: BufferConfig {
                initial_bytes: config.buffer.initial_bytes,
                growth_bytes: config.buffer.growth_bytes,
                max_bytes: config.buffer.max_bytes,
            },
            backoff: BackoffPolicy {
                initial: Duration::from_millis(config.retry.initial_backoff_ms),
                max: Duration::from_millis(config.retry.max_backoff_ms),
                max_attempts: config.retry.max_attempts,
            },
            idle_delay: Duration::from_millis(config.retry.idle_delay_ms),
            post_playback_delay: Duration::from_millis(config.retry.post_playback_delay_ms),
            sink_write_retries: config.retry.sink_write_retries,
            sink_retry_delay: Duration::from_millis(config.retry.sink_retry_delay_ms),
            source_read_retries: config.retry.source_read_retries,
            upload_retries: config.retry.upload_retries,
            upload_queue_depth: defaults::UPLOAD_QUEUE_DEPTH,
            device_id: config.service.device_id.clone(),
            event_tx: None,
        }
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    cancel: CancellationToken,
    duplex: Arc<HalfDuplex>,
    fetch_task: tokio::task::JoinHandle<()>,
    upload_task: Option<tokio::task::JoinHandle<()>>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

impl PipelineHandle {
    /// Token that stops the pipeline when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The half-duplex gate shared by playback and capture.
    pub fn duplex(&self) -> Arc<HalfDuplex> {
        self.duplex.clone()
    }

    /// Returns true until `stop()` is called or the token is cancelled.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stops every task and waits for them to finish.
    ///
    /// Tasks still running after the shutdown timeout are detached; they
    /// die with the process.
    pub async fn stop(self) {
        self.cancel.cancel();

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.fetch_task)
            .await
            .is_err()
        {
            tracing::warn!("fetch loop did not stop in time, detaching");
        }

        let threads = self.threads;
        let joined = tokio::task::spawn_blocking(move || {
            for (name, handle) in threads {
                if let Err(panic_info) = handle.join() {
                    let msg = panic_info
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic");
                    tracing::error!(thread = name, "pipeline thread panicked: {msg}");
                }
            }
        });
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, joined).await.is_err() {
            tracing::warn!("pipeline threads did not stop in time, detaching");
        }

        // The capture thread owned the upload sender, so the uploader drains
        // what is queued and then ends.
        if let Some(task) = self.upload_task
            && tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err()
        {
            tracing::warn!("uploader did not finish in time, detaching");
        }
    }
}

/// Streaming audio pipeline: poll → download → play, capture → segment → upload.
pub struct Pipeline {
    config: PipelineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Creates a new pipeline with the default error reporter.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Uses an existing cancellation token (e.g. one tied to Ctrl-C).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Starts the pipeline. Must be called from within a tokio runtime.
    ///
    /// Without a `source` only the poll/download/play half runs.
    pub fn start(
        self,
        service: Arc<dyn AudioService>,
        sink: Box<dyn AudioSink>,
        source: Option<Box<dyn AudioSource>>,
    ) -> Result<PipelineHandle> {
        let config = self.config;
        let bridge = SampleBridge::new(
            config.service_sample_rate,
            config.device_sample_rate,
            config.device_channels,
        )?;
        let duplex = Arc::new(HalfDuplex::new());
        let events = EventSender::new(config.event_tx.clone());
        let mut threads = Vec::new();

        // Playback: single-slot handoff, one clip live at a time
        let (playback_tx, playback_rx) = bounded::<PlaybackRequest>(1);
        let playback = PlaybackStation::new(sink, bridge, duplex.clone())
            .with_chunk_bytes(config.playback_chunk_bytes)
            .with_write_retries(config.sink_write_retries, config.sink_retry_delay)
            .with_service_rate(config.service_sample_rate)
            .with_events(events.clone())
            .with_error_reporter(self.error_reporter.clone());
        threads.push(("playback", playback.spawn(playback_rx, self.cancel.clone())?));

        // Capture + uploader
        let upload_task = match source {
            Some(source) => {
                let (upload_tx, upload_rx) = mpsc::channel(config.upload_queue_depth.max(1));
                let (recycle_tx, recycle_rx) = bounded(config.upload_queue_depth.max(1) + 1);
                let capture = CaptureStation::new(
                    source,
                    bridge,
                    Segmenter::new(config.segmenter),
                    duplex.clone(),
                )
                .with_chunk_frames(config.capture_chunk_frames)
                .with_read_retries(config.source_read_retries)
                .with_events(events.clone())
                .with_error_reporter(self.error_reporter.clone());
                let capture = capture.spawn(upload_tx, recycle_rx, self.cancel.clone())?;
                threads.push(("capture", capture));

                let uploader = Uploader {
                    service: service.clone(),
                    retries: config.upload_retries,
                    retry_delay: config.backoff.initial,
                    device_id: config.device_id.clone(),
                    events: events.clone(),
                };
                Some(tokio::spawn(uploader.run(upload_rx, recycle_tx)))
            }
            None => None,
        };

        let fetch = FetchLoop {
            service,
            playback_tx,
            buffer: config.buffer,
            backoff: Backoff::new(config.backoff),
            idle_delay: config.idle_delay,
            post_playback_delay: config.post_playback_delay,
            events,
            cancel: self.cancel.clone(),
        };
        let fetch_task = tokio::spawn(fetch.run());

        Ok(PipelineHandle {
            cancel: self.cancel,
            duplex,
            fetch_task,
            upload_task,
            threads,
        })
    }
}

/// Poll → download → hand off → await completion, forever.
struct FetchLoop {
    service: Arc<dyn AudioService>,
    playback_tx: crossbeam_channel::Sender<PlaybackRequest>,
    buffer: BufferConfig,
    backoff: Backoff,
    idle_delay: Duration,
    post_playback_delay: Duration,
    events: EventSender,
    cancel: CancellationToken,
}

impl FetchLoop {
    async fn run(mut self) {
        tracing::info!("polling for audio");
        while !self.cancel.is_cancelled() {
            let poll = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.service.poll() => result,
            };

            match poll {
                Ok(PollResult::Found(audio_id)) => {
                    self.backoff.reset();
                    self.fetch_and_play(audio_id).await;
                }
                Ok(PollResult::NotFound) => {
                    self.backoff.reset();
                    self.events.send(PipelineEvent::PollIdle);
                    self.sleep(self.idle_delay).await;
                }
                Err(TalkbackError::Parse { message }) => {
                    tracing::warn!(%message, "malformed poll response, treating as no work");
                    self.events.send(PipelineEvent::PollIdle);
                    self.sleep(self.idle_delay).await;
                }
                Err(e) => self.back_off("poll", &e).await,
            }
        }
        tracing::debug!("fetch loop exiting");
    }

    async fn fetch_and_play(&mut self, audio_id: String) {
        // The id is claimed before any bytes exist
        self.events.clip(&audio_id, ClipState::Empty);
        self.events.clip(&audio_id, ClipState::Downloading);
        tracing::info!(audio_id = %audio_id, "downloading clip");

        let mut buffer = DownloadBuffer::new(self.buffer);
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.service.download(&audio_id, &mut buffer) => result,
        };

        if let Err(e) = result {
            self.events.send(PipelineEvent::DownloadFailed {
                audio_id: audio_id.clone(),
                message: e.to_string(),
            });
            self.back_off("download", &e).await;
            return;
        }
        if buffer.is_empty() {
            tracing::warn!(audio_id = %audio_id, "downloaded clip is empty, skipping");
            self.events.clip(&audio_id, ClipState::Done);
            return;
        }

        let clip = AudioClip::from_download(audio_id.clone(), buffer);
        self.events.clip(&audio_id, ClipState::Ready);
        tracing::info!(audio_id = %audio_id, bytes = clip.total_bytes(), "clip ready");

        let (done_tx, done_rx) = oneshot::channel();
        if let Err(e) = self.playback_tx.try_send(PlaybackRequest {
            clip,
            done: done_tx,
        }) {
            tracing::error!(audio_id = %audio_id, "playback unavailable: {e}");
            return;
        }

        match done_rx.await {
            Ok(report) => {
                if let Some(error) = report.error {
                    tracing::warn!(audio_id = %audio_id, %error, "clip abandoned");
                }
            }
            Err(_) => {
                tracing::warn!(audio_id = %audio_id, "playback ended without a report");
                return;
            }
        }
        self.sleep(self.post_playback_delay).await;
    }

    async fn back_off(&mut self, what: &str, error: &TalkbackError) {
        let step = self.backoff.on_failure();
        match step {
            BackoffStep::Retry(delay) => tracing::warn!(
                what,
                %error,
                attempt = self.backoff.failures(),
                delay_ms = delay.as_millis() as u64,
                "request failed, backing off"
            ),
            BackoffStep::Exhausted(delay) => tracing::error!(
                what,
                %error,
                delay_ms = delay.as_millis() as u64,
                "service unreachable, waiting before starting over"
            ),
        }
        self.sleep(step.delay()).await;
    }

    async fn sleep(&self, delay: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Uploads finished utterances and returns their buffers to the segmenter.
struct Uploader {
    service: Arc<dyn AudioService>,
    retries: u32,
    retry_delay: Duration,
    device_id: String,
    events: EventSender,
}

impl Uploader {
    async fn run(
        self,
        mut sessions: mpsc::Receiver<RecordingSession>,
        recycle: crossbeam_channel::Sender<Vec<u8>>,
    ) {
        while let Some(session) = sessions.recv().await {
            self.upload(&session).await;
            if recycle.try_send(session.into_buffer()).is_err() {
                tracing::trace!("recycle channel full, freeing buffer");
            }
        }
        tracing::debug!("uploader exiting");
    }

    async fn upload(&self, session: &RecordingSession) {
        let mut attempt = 0;
        loop {
            match self.service.upload(session.bytes()).await {
                Ok(receipt) => {
                    if let Some(echoed) = receipt.device_id.as_deref()
                        && echoed != self.device_id
                    {
                        tracing::warn!(
                            expected = %self.device_id,
                            echoed,
                            "upload receipt names a different device"
                        );
                    }
                    match receipt.text.as_deref() {
                        Some(text) => tracing::info!(text, "transcription"),
                        None => tracing::info!(bytes = session.len(), "upload finished"),
                    }
                    self.events.send(PipelineEvent::UploadFinished {
                        bytes: session.len(),
                        text: receipt.text,
                    });
                    return;
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "upload failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "upload failed, dropping utterance");
                    self.events.send(PipelineEvent::UploadFailed {
                        message: e.to_string(),
                    });
                    return;
                }
            }
        }
    }
}

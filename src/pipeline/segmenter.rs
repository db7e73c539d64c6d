//! Energy-threshold voice-activity segmenter.
//!
//! Turns a continuous stream of service-rate mono chunks into discrete
//! utterances. Durations are derived from sample counts, never from a wall
//! clock, so the outcome depends only on the audio.

use crate::audio::bridge::extend_le_bytes;
use crate::audio::level::mean_abs_volume;
use crate::defaults;
use crate::pipeline::types::{RecordingSession, SegmentState};

/// Configuration for the segmenter.
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// Mean-absolute volume at or above which a chunk counts as voiced.
    pub threshold: u32,
    /// Trailing silence that ends an utterance (milliseconds).
    pub silence_timeout_ms: u32,
    /// Shorter utterances are discarded (milliseconds).
    pub min_duration_ms: u32,
    /// Byte capacity of one recording session.
    pub capacity_bytes: usize,
    /// Rate of the incoming samples in Hz.
    pub sample_rate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::VAD_THRESHOLD,
            silence_timeout_ms: defaults::SILENCE_TIMEOUT_MS,
            min_duration_ms: defaults::MIN_UTTERANCE_MS,
            capacity_bytes: defaults::RECORDING_CAPACITY_BYTES,
            sample_rate: defaults::SERVICE_SAMPLE_RATE,
        }
    }
}

/// What happened to the stream after one chunk.
#[derive(Debug)]
pub enum SegmentOutcome {
    /// No utterance finished.
    Continue,
    /// An utterance finished and is long enough to upload.
    Emitted(RecordingSession),
    /// An utterance finished but was shorter than the minimum.
    Discarded { duration_ms: u32 },
}

/// Voice-activity state machine with hysteresis.
///
/// ```text
/// Idle --loud--> Voiced --quiet--> TrailingSilence --loud--> Voiced
///                                  TrailingSilence --timeout--> Idle
/// ```
pub struct Segmenter {
    config: SegmenterConfig,
    session: Option<RecordingSession>,
    spare: Vec<Vec<u8>>,
    scratch: Vec<u8>,
    last_volume: u32,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            session: None,
            spare: Vec::new(),
            scratch: Vec::new(),
            last_volume: 0,
        }
    }

    /// Current state (`Idle` when no session is open).
    pub fn state(&self) -> SegmentState {
        self.session
            .as_ref()
            .map_or(SegmentState::Idle, RecordingSession::state)
    }

    /// Volume of the most recently processed chunk.
    pub fn last_volume(&self) -> u32 {
        self.last_volume
    }

    /// Returns a session buffer for reuse by the next utterance.
    pub fn recycle(&mut self, buffer: Vec<u8>) {
        self.spare.push(buffer);
    }

    /// Number of buffers waiting for reuse.
    pub fn spare_buffers(&self) -> usize {
        self.spare.len()
    }

    /// Feeds one chunk of mono samples through the state machine.
    pub fn process(&mut self, samples: &[i16]) -> SegmentOutcome {
        let volume = mean_abs_volume(samples);
        self.last_volume = volume;
        let loud = volume >= self.config.threshold;

        self.scratch.clear();
        extend_le_bytes(samples, &mut self.scratch);

        let Some(session) = self.session.as_mut() else {
            if loud {
                let mut session = self.open_session();
                session.append(&self.scratch, samples.len());
                session.set_state(SegmentState::Voiced);
                tracing::debug!(volume, "voice detected, recording");
                self.session = Some(session);
            }
            return SegmentOutcome::Continue;
        };

        match (session.state(), loud) {
            (_, true) => {
                session.append(&self.scratch, samples.len());
                session.reset_silence();
                session.set_state(SegmentState::Voiced);
            }
            (SegmentState::Voiced, false) => {
                session.append(&self.scratch, samples.len());
                session.add_silence(samples.len());
                session.set_state(SegmentState::TrailingSilence);
            }
            (_, false) => {
                let silence = session.add_silence(samples.len());
                if timed_out(&self.config, silence) {
                    return self.close_session();
                }
                session.append(&self.scratch, samples.len());
            }
        }
        SegmentOutcome::Continue
    }

    /// Ends any open session as if the silence timeout had elapsed.
    ///
    /// Called on shutdown so a half-finished utterance is not lost.
    pub fn finish(&mut self) -> SegmentOutcome {
        if self.session.is_none() {
            return SegmentOutcome::Continue;
        }
        self.close_session()
    }

    fn open_session(&mut self) -> RecordingSession {
        let buffer = self
            .spare
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.config.capacity_bytes));
        RecordingSession::with_buffer(buffer, self.config.capacity_bytes, self.config.sample_rate)
    }

    fn close_session(&mut self) -> SegmentOutcome {
        let Some(mut session) = self.session.take() else {
            return SegmentOutcome::Continue;
        };
        session.set_state(SegmentState::Idle);
        let duration_ms = session.duration_ms();

        if duration_ms >= self.config.min_duration_ms {
            tracing::info!(
                duration_ms,
                trailing_silence_ms = session.silence_ms(),
                bytes = session.len(),
                "utterance finished"
            );
            SegmentOutcome::Emitted(session)
        } else {
            tracing::debug!(duration_ms, "utterance too short, discarded");
            self.spare.push(session.into_buffer());
            SegmentOutcome::Discarded { duration_ms }
        }
    }
}

fn timed_out(config: &SegmenterConfig, silence_samples: u64) -> bool {
    silence_samples * 1000 >= config.silence_timeout_ms as u64 * config.sample_rate as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;
    const CHUNK: usize = 1600; // 100 ms

    fn config(timeout_ms: u32, min_ms: u32) -> SegmenterConfig {
        SegmenterConfig {
            threshold: 500,
            silence_timeout_ms: timeout_ms,
            min_duration_ms: min_ms,
            capacity_bytes: 1024 * 1024,
            sample_rate: RATE,
        }
    }

    /// A chunk whose mean-absolute volume is exactly `volume`, tagged so
    /// chunks can be told apart in the recording.
    fn chunk(volume: i16, tag: i16) -> Vec<i16> {
        let mut samples: Vec<i16> = (0..CHUNK)
            .map(|i| if i % 2 == 0 { volume } else { -volume })
            .collect();
        // Replace one sample pair with a tag that keeps the mean unchanged
        samples[0] = volume.saturating_add(tag);
        samples[1] = -(volume.saturating_sub(tag));
        samples
    }

    fn bytes_of(chunks: &[Vec<i16>]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for c in chunks {
            extend_le_bytes(c, &mut bytes);
        }
        bytes
    }

    #[test]
    fn test_single_utterance_excludes_timeout_chunk() {
        let mut segmenter = Segmenter::new(config(250, 150));
        let volumes = [0, 0, 800, 800, 0, 0, 0];
        let chunks: Vec<Vec<i16>> = volumes
            .iter()
            .enumerate()
            .map(|(i, &v)| chunk(v, i as i16 + 1))
            .collect();

        let mut emitted = Vec::new();
        for c in &chunks {
            match segmenter.process(c) {
                SegmentOutcome::Emitted(session) => emitted.push(session),
                SegmentOutcome::Discarded { .. } => panic!("nothing should be discarded"),
                SegmentOutcome::Continue => {}
            }
        }

        assert_eq!(emitted.len(), 1);
        let session = &emitted[0];
        // chunks 3..=6 (1-based), the 7th crossed the timeout
        assert_eq!(session.bytes(), bytes_of(&chunks[2..6]).as_slice());
        assert_eq!(session.duration_ms(), 400);
        assert_eq!(segmenter.state(), SegmentState::Idle);
    }

    #[test]
    fn test_state_transitions() {
        let mut segmenter = Segmenter::new(config(250, 150));
        assert_eq!(segmenter.state(), SegmentState::Idle);

        segmenter.process(&chunk(0, 0));
        assert_eq!(segmenter.state(), SegmentState::Idle);

        segmenter.process(&chunk(800, 0));
        assert_eq!(segmenter.state(), SegmentState::Voiced);

        segmenter.process(&chunk(0, 0));
        assert_eq!(segmenter.state(), SegmentState::TrailingSilence);

        segmenter.process(&chunk(800, 0));
        assert_eq!(segmenter.state(), SegmentState::Voiced);
    }

    #[test]
    fn test_volume_equal_to_threshold_is_voiced() {
        let mut segmenter = Segmenter::new(config(250, 150));
        segmenter.process(&chunk(500, 0));
        assert_eq!(segmenter.state(), SegmentState::Voiced);
        assert_eq!(segmenter.last_volume(), 500);
    }

    #[test]
    fn test_short_utterance_is_discarded() {
        // 120 ms of speech, then silence past the timeout
        let mut segmenter = Segmenter::new(config(250, 500));
        segmenter.process(&vec![900i16; 1920]);

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(segmenter.process(&chunk(0, 0)));
        }

        assert!(
            !outcomes
                .iter()
                .any(|o| matches!(o, SegmentOutcome::Emitted(_)))
        );
        let discarded: Vec<u32> = outcomes
            .iter()
            .filter_map(|o| match o {
                SegmentOutcome::Discarded { duration_ms } => Some(*duration_ms),
                _ => None,
            })
            .collect();
        // 120 ms voiced + 200 ms trailing silence recorded before the timeout
        assert_eq!(discarded, vec![320]);
        assert_eq!(segmenter.spare_buffers(), 1, "discarded buffer is kept");
    }

    #[test]
    fn test_finish_discards_session_below_minimum() {
        // 120 ms of speech, cut off by shutdown
        let mut segmenter = Segmenter::new(config(250, 500));
        assert!(matches!(segmenter.process(&vec![900i16; 1920]), SegmentOutcome::Continue));
        assert!(matches!(segmenter.finish(), SegmentOutcome::Discarded { duration_ms: 120 }));

        // 80 ms voiced + 40 ms trailing silence counts the same
        segmenter.process(&vec![900i16; 1280]);
        segmenter.process(&vec![0i16; 640]);
        assert!(matches!(segmenter.finish(), SegmentOutcome::Discarded { duration_ms: 120 }));
        assert_eq!(segmenter.state(), SegmentState::Idle);
    }

    #[test]
    fn test_speech_resuming_resets_silence_run() {
        let mut segmenter = Segmenter::new(config(250, 150));
        segmenter.process(&chunk(800, 0));
        segmenter.process(&chunk(0, 0));
        segmenter.process(&chunk(0, 0));
        segmenter.process(&chunk(800, 0));
        // Two more silent chunks would have crossed 250 ms without the reset
        assert!(matches!(segmenter.process(&chunk(0, 0)), SegmentOutcome::Continue));
        assert!(matches!(segmenter.process(&chunk(0, 0)), SegmentOutcome::Continue));
        assert!(matches!(
            segmenter.process(&chunk(0, 0)),
            SegmentOutcome::Emitted(_)
        ));
    }

    #[test]
    fn test_overflow_still_finalizes() {
        let mut cfg = config(250, 150);
        cfg.capacity_bytes = CHUNK * 2; // one chunk of samples fits
        let mut segmenter = Segmenter::new(cfg);

        for _ in 0..5 {
            segmenter.process(&chunk(800, 0));
        }
        let mut result = None;
        for _ in 0..3 {
            if let SegmentOutcome::Emitted(session) = segmenter.process(&chunk(0, 0)) {
                result = Some(session);
            }
        }

        let session = result.expect("session should finalize at timeout");
        assert_eq!(session.len(), CHUNK * 2);
        assert!(session.overflowed());
        assert_eq!(session.duration_ms(), 700);
    }

    #[test]
    fn test_recycled_buffer_is_reused() {
        let mut segmenter = Segmenter::new(config(100, 50));
        segmenter.process(&chunk(800, 0));
        // First silent chunk enters trailing silence, the second times out
        assert!(matches!(segmenter.process(&chunk(0, 0)), SegmentOutcome::Continue));
        let SegmentOutcome::Emitted(session) = segmenter.process(&chunk(0, 0)) else {
            panic!("expected an utterance");
        };

        segmenter.recycle(session.into_buffer());
        assert_eq!(segmenter.spare_buffers(), 1);
        segmenter.process(&chunk(800, 0));
        assert_eq!(segmenter.spare_buffers(), 0);
    }

    #[test]
    fn test_finish_flushes_open_session() {
        let mut segmenter = Segmenter::new(config(3000, 150));
        segmenter.process(&chunk(800, 0));
        segmenter.process(&chunk(800, 0));

        assert!(matches!(segmenter.finish(), SegmentOutcome::Emitted(_)));
        assert!(matches!(segmenter.finish(), SegmentOutcome::Continue));
    }
}

//! Half-duplex gate between playback and capture.
//!
//! The speaker and microphone share one codec. Capture holds a turn around
//! each source read, playback holds a turn for a whole clip, and a waiting
//! playback keeps new capture turns from starting so it cannot starve.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct GateState {
    capturing: bool,
    playing: bool,
    playback_waiting: usize,
}

/// Mutual exclusion of capture and playback.
#[derive(Debug, Default)]
pub struct HalfDuplex {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl HalfDuplex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until any in-flight capture read finishes, then holds the
    /// playback turn until the returned guard is dropped.
    pub fn begin_playback(&self) -> PlaybackTurn<'_> {
        let mut state = self.lock();
        state.playback_waiting += 1;
        let mut state = self
            .changed
            .wait_while(state, |s| s.capturing || s.playing)
            .unwrap_or_else(PoisonError::into_inner);
        state.playback_waiting -= 1;
        state.playing = true;
        PlaybackTurn { gate: self }
    }

    /// Takes a capture turn, waiting at most `timeout` for playback to end.
    ///
    /// Returns `None` while a clip is playing or about to play.
    pub fn try_begin_capture(&self, timeout: Duration) -> Option<CaptureTurn<'_>> {
        let state = self.lock();
        let (mut state, result) = self
            .changed
            .wait_timeout_while(state, timeout, |s| {
                s.playing || s.playback_waiting > 0 || s.capturing
            })
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && (state.playing || state.playback_waiting > 0 || state.capturing) {
            return None;
        }
        state.capturing = true;
        Some(CaptureTurn { gate: self })
    }

    /// `(capturing, playing)`, read under one lock.
    pub fn snapshot(&self) -> (bool, bool) {
        let state = self.lock();
        (state.capturing, state.playing)
    }
}

/// Playback turn; released on drop.
#[must_use]
pub struct PlaybackTurn<'a> {
    gate: &'a HalfDuplex,
}

impl Drop for PlaybackTurn<'_> {
    fn drop(&mut self) {
        self.gate.lock().playing = false;
        self.gate.changed.notify_all();
    }
}

/// Capture turn; released on drop.
#[must_use]
pub struct CaptureTurn<'a> {
    gate: &'a HalfDuplex,
}

impl Drop for CaptureTurn<'_> {
    fn drop(&mut self) {
        self.gate.lock().capturing = false;
        self.gate.changed.notify_all();
    }
}

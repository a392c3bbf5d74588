//! Gap-free, overlap-free playback scheduling of inbound audio chunks.
//!
//! The scheduler owns a monotonically advancing `next_start_time` and
//! the registry of currently playing sources. Chunks are scheduled
//! back-to-back against the output device's own clock; an interruption
//! stops everything audible and zeroes the clock so the next chunk
//! re-anchors to live device time instead of a stale future timestamp.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::codec::InboundAudioChunk;

/// Identifier of one scheduled, possibly still-playing source.
pub type PlaybackId = u64;

/// Notifications from the output device back to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A source finished playing naturally.
    Ended(PlaybackId),
}

/// Capability handle onto the speaker output.
///
/// Implementations run their own playback machinery (an ALSA thread in
/// production, a recording fake in tests) and report natural completion
/// through a [`PlaybackEvent`] stream handed out at construction.
pub trait OutputDevice: Send + Sync {
    /// Seconds on the device's own monotonic clock.
    fn current_time(&self) -> f64;

    /// Begin playing `chunk` at device time `at`, returning the id of
    /// the new source.
    fn start_source(&self, chunk: InboundAudioChunk, at: f64) -> PlaybackId;

    /// Stop one source immediately. Stopped sources do not emit
    /// [`PlaybackEvent::Ended`].
    fn stop_source(&self, id: PlaybackId);

    /// Release the device. Idempotent; called exactly once per session
    /// teardown path, and again harmlessly from `Drop`.
    fn shutdown(&self);
}

struct SchedulerState {
    next_start_time: f64,
    active: HashSet<PlaybackId>,
}

/// Schedules inbound chunks for contiguous playback.
///
/// Registry and clock sit behind one mutex: enqueue and interrupt run
/// on the session task while completion deregistration arrives from the
/// device thread.
pub struct PlaybackScheduler {
    device: Arc<dyn OutputDevice>,
    state: Mutex<SchedulerState>,
}

impl PlaybackScheduler {
    pub fn new(device: Arc<dyn OutputDevice>) -> Self {
        Self {
            device,
            state: Mutex::new(SchedulerState {
                next_start_time: 0.0,
                active: HashSet::new(),
            }),
        }
    }

    /// Schedule `chunk` to start at `max(next_start_time, device time)`
    /// and advance the clock by its duration.
    ///
    /// Zero-length chunks are a complete no-op: nothing is scheduled
    /// and the clock does not move.
    pub fn enqueue(&self, chunk: InboundAudioChunk) {
        if chunk.is_empty() {
            return;
        }
        let duration = chunk.duration();
        let mut state = self.state.lock().unwrap();
        let start = state.next_start_time.max(self.device.current_time());
        let id = self.device.start_source(chunk, start);
        state.next_start_time = start + duration;
        state.active.insert(id);
        log::debug!("scheduled source {id} at {start:.3}s for {duration:.3}s");
    }

    /// Natural-completion deregistration, driven by device events.
    pub fn on_source_ended(&self, id: PlaybackId) {
        self.state.lock().unwrap().active.remove(&id);
    }

    /// Stop every registered source, clear the registry, and reset the
    /// clock to zero.
    ///
    /// After a genuine barge-in the server discards its own buffered
    /// output, so resuming relative to the old schedule would
    /// reintroduce a drifted delay.
    pub fn interrupt(&self) {
        let stopped: Vec<PlaybackId> = {
            let mut state = self.state.lock().unwrap();
            state.next_start_time = 0.0;
            state.active.drain().collect()
        };
        if !stopped.is_empty() {
            log::info!("interrupting {} active source(s)", stopped.len());
        }
        // stop_source outside the lock: the device may deliver events
        // synchronously on some implementations.
        for id in stopped {
            self.device.stop_source(id);
        }
    }

    /// Number of sources currently registered as audible.
    pub fn active_sources(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.state.lock().unwrap().next_start_time
    }
}

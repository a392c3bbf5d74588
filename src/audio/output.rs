//! ALSA-backed speaker output.
//!
//! Implements [`OutputDevice`] for the playback scheduler: a dedicated
//! OS thread owns the ALSA device and plays scheduled sources in order.
//! The device clock is a monotonic epoch started when the device opens.
//! Writes are paced by the hardware, so back-to-back sources come out
//! contiguous; a gap before a source's scheduled start is honored by
//! sleeping. Interruption is checked between period-sized writes so a
//! barge-in cuts playback mid-chunk.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::device;
use crate::codec::InboundAudioChunk;
use crate::error::VoiceError;
use crate::playback::{OutputDevice, PlaybackEvent, PlaybackId};

#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// ALSA device name.
    pub device: String,
    pub sample_rate: u32,
}

struct PlayCmd {
    id: PlaybackId,
    samples: Vec<f32>,
    start_at: f64,
}

/// Ids stopped by interruption, shared with the playback thread.
///
/// Ids are handed out in send order and the thread processes commands
/// in that same order, so the highest finished id is a watermark: a
/// stop request at or below it raced a natural completion and is
/// already moot. Without the watermark such an id would sit in the set
/// for the rest of the session.
struct StopRegistry {
    stopped: Mutex<HashSet<PlaybackId>>,
    finished: AtomicU64,
}

impl StopRegistry {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(HashSet::new()),
            finished: AtomicU64::new(0),
        }
    }

    fn stop(&self, id: PlaybackId) {
        if id <= self.finished.load(Ordering::SeqCst) {
            return;
        }
        self.stopped.lock().unwrap().insert(id);
    }

    fn is_stopped(&self, id: PlaybackId) -> bool {
        self.stopped.lock().unwrap().contains(&id)
    }

    /// The thread is done with `id`, stopped or not.
    fn finish(&self, id: PlaybackId) {
        let mut stopped = self.stopped.lock().unwrap();
        stopped.remove(&id);
        self.finished.store(id, Ordering::SeqCst);
    }

    /// Drop stale entries; run while the command queue is empty.
    fn sweep(&self) {
        let watermark = self.finished.load(Ordering::SeqCst);
        self.stopped.lock().unwrap().retain(|&id| id > watermark);
    }
}

pub struct AlsaOutput {
    epoch: Instant,
    cmd_tx: Mutex<Sender<PlayCmd>>,
    next_id: AtomicU64,
    stops: Arc<StopRegistry>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AlsaOutput {
    /// Open the playback device and start the playback thread. Waits
    /// for the open handshake so device failures surface here.
    pub fn open(
        config: &OutputConfig,
    ) -> Result<(Arc<Self>, mpsc::Receiver<PlaybackEvent>), VoiceError> {
        let (cmd_tx, cmd_rx) = channel::<PlayCmd>();
        let (event_tx, event_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = channel::<Result<(), VoiceError>>();
        let running = Arc::new(AtomicBool::new(true));
        let stops = Arc::new(StopRegistry::new());
        let epoch = Instant::now();

        let thread = {
            let running = running.clone();
            let stops = stops.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("voice-playback".into())
                .spawn(move || {
                    playback_thread(&config, epoch, cmd_rx, event_tx, ready_tx, &running, &stops)
                })
                .map_err(|e| VoiceError::Device(format!("failed to spawn playback thread: {e}")))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok((
                Arc::new(Self {
                    epoch,
                    cmd_tx: Mutex::new(cmd_tx),
                    next_id: AtomicU64::new(1),
                    stops,
                    running,
                    thread: Mutex::new(Some(thread)),
                }),
                event_rx,
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoiceError::Device(
                    "playback thread exited before opening the device".to_string(),
                ))
            }
        }
    }
}

impl OutputDevice for AlsaOutput {
    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn start_source(&self, chunk: InboundAudioChunk, at: f64) -> PlaybackId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cmd = PlayCmd {
            id,
            samples: chunk.samples,
            start_at: at,
        };
        if self.cmd_tx.lock().unwrap().send(cmd).is_err() {
            log::warn!("playback thread gone, dropping source {id}");
        }
        id
    }

    fn stop_source(&self, id: PlaybackId) {
        self.stops.stop(id);
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn playback_thread(
    config: &OutputConfig,
    epoch: Instant,
    cmd_rx: std::sync::mpsc::Receiver<PlayCmd>,
    event_tx: mpsc::Sender<PlaybackEvent>,
    ready_tx: Sender<Result<(), VoiceError>>,
    running: &AtomicBool,
    stops: &StopRegistry,
) {
    let (pcm, params) = match device::open_playback(&config.device, config.sample_rate, 1) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready_tx.send(Err(VoiceError::Device(format!("playback I/O setup: {e}"))));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    let period = params.period_size.max(256);
    log::info!(
        "playback started: rate={}, period={}",
        params.sample_rate,
        params.period_size,
    );

    'commands: while running.load(Ordering::Relaxed) {
        let cmd = match cmd_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(cmd) => cmd,
            Err(RecvTimeoutError::Timeout) => {
                stops.sweep();
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Honor the scheduled start; once writing begins, the blocking
        // writes pace themselves at hardware rate.
        loop {
            if !running.load(Ordering::Relaxed) {
                break 'commands;
            }
            if stops.is_stopped(cmd.id) {
                stops.finish(cmd.id);
                continue 'commands;
            }
            let now = epoch.elapsed().as_secs_f64();
            if now >= cmd.start_at {
                break;
            }
            thread::sleep(Duration::from_secs_f64((cmd.start_at - now).min(0.005)));
        }

        // The device side clamps: wraparound is a codec contract, not
        // something to send to the speaker.
        let samples: Vec<i16> = cmd
            .samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();

        let mut offset = 0;
        let mut cut = false;
        let mut retries = 0u32;
        while offset < samples.len() {
            if !running.load(Ordering::Relaxed) {
                break 'commands;
            }
            if stops.is_stopped(cmd.id) {
                cut = true;
                break;
            }
            let end = (offset + period).min(samples.len());
            match io.writei(&samples[offset..end]) {
                Ok(n) => {
                    offset += n;
                    retries = 0;
                }
                Err(e) => {
                    log::warn!("ALSA playback error: {e}, recovering...");
                    retries += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("failed to recover playback device: {e2}");
                        break 'commands;
                    }
                    if retries >= 3 {
                        log::error!(
                            "giving up on source {} after {retries} recovery attempts",
                            cmd.id,
                        );
                        break;
                    }
                }
            }
        }

        stops.finish(cmd.id);
        if !cut && offset >= samples.len() {
            // Natural completion; stopped sources never report.
            let _ = event_tx.blocking_send(PlaybackEvent::Ended(cmd.id));
        }
    }

    let _ = pcm.drain();
    log::info!("playback stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_after_completion_leaves_no_entry() {
        let stops = StopRegistry::new();
        stops.finish(1);
        // Stop request arriving after the source already finished.
        stops.stop(1);
        assert!(stops.stopped.lock().unwrap().is_empty());
    }

    #[test]
    fn pending_stops_survive_the_watermark() {
        let stops = StopRegistry::new();
        stops.finish(2);
        stops.stop(5);
        assert!(stops.is_stopped(5));
        stops.sweep();
        assert!(stops.is_stopped(5));
    }

    #[test]
    fn sweep_drops_entries_behind_the_watermark() {
        let stops = StopRegistry::new();
        stops.stop(3);
        // The thread finished a later command without seeing id 3's
        // stop in time.
        stops.finish(4);
        stops.sweep();
        assert!(!stops.is_stopped(3));
    }

    #[test]
    fn finish_removes_its_own_entry() {
        let stops = StopRegistry::new();
        stops.stop(7);
        stops.finish(7);
        assert!(!stops.is_stopped(7));
        assert!(stops.stopped.lock().unwrap().is_empty());
    }
}

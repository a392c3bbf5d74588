//! Microphone capture pipeline.
//!
//! One OS thread owns the ALSA capture device, taps every sample into
//! the shared [`Analyzer`], and delivers fixed-size frames to the
//! session over a bounded channel. Delivery is paced by the hardware,
//! not by a timer, so frame cadence is only average. When the consumer
//! lags, frames are dropped rather than queued: in a live conversation
//! stale audio is worse than missing audio.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use super::device;
use crate::analyzer::Analyzer;
use crate::error::VoiceError;

/// One fixed-size block of mono samples from the microphone.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// ALSA device name (e.g. "default", "plughw:0,0").
    pub device: String,
    pub sample_rate: u32,
    /// Samples per delivered frame.
    pub frame_size: usize,
}

/// Owner of a running capture thread. Stopping joins the thread and
/// releases the device; also runs on `Drop`.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// A handle with no capture thread behind it, for backends that
    /// feed frames another way (tests, remote sources).
    pub fn detached() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            thread: None,
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the microphone and start delivering frames.
///
/// The device is opened on the capture thread; this function waits for
/// the open handshake so permission and device failures surface to the
/// caller synchronously.
pub fn start_capture(
    config: &CaptureConfig,
    analyzer: Arc<Analyzer>,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<CaptureHandle, VoiceError> {
    let running = Arc::new(AtomicBool::new(true));
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), VoiceError>>();

    let thread = {
        let running = running.clone();
        let config = config.clone();
        thread::Builder::new()
            .name("voice-capture".into())
            .spawn(move || capture_thread(&config, analyzer, frames, ready_tx, &running))
            .map_err(|e| VoiceError::Device(format!("failed to spawn capture thread: {e}")))?
    };

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle {
            running,
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(VoiceError::Device(
                "capture thread exited before opening the device".to_string(),
            ))
        }
    }
}

fn capture_thread(
    config: &CaptureConfig,
    analyzer: Arc<Analyzer>,
    frames: mpsc::Sender<AudioFrame>,
    ready_tx: std::sync::mpsc::Sender<Result<(), VoiceError>>,
    running: &AtomicBool,
) {
    let (pcm, params) = match device::open_capture(&config.device, config.sample_rate, 1) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready_tx.send(Err(VoiceError::Device(format!("capture I/O setup: {e}"))));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    if params.sample_rate != config.sample_rate {
        log::warn!(
            "capture rate negotiated to {} Hz (wanted {})",
            params.sample_rate,
            config.sample_rate,
        );
    }

    let mut read_buf = vec![0i16; params.period_size];
    let mut scratch: Vec<f32> = Vec::with_capacity(params.period_size);
    let mut pending: Vec<f32> = Vec::with_capacity(config.frame_size * 2);
    let mut dropped: u64 = 0;

    log::info!(
        "capture started: rate={}, period={}, frame_size={}",
        params.sample_rate,
        params.period_size,
        config.frame_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(n) => {
                scratch.clear();
                scratch.extend(read_buf[..n].iter().map(|&v| v as f32 / 32768.0));
                analyzer.push_samples(&scratch);
                pending.extend_from_slice(&scratch);

                while pending.len() >= config.frame_size {
                    let frame: Vec<f32> = pending.drain(..config.frame_size).collect();
                    match frames.try_send(AudioFrame { samples: frame }) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Bounded-latency policy: drop instead of queue.
                            dropped += 1;
                            if dropped.is_power_of_two() {
                                log::warn!("outbound queue full, {dropped} frame(s) dropped");
                            }
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            log::info!("frame receiver dropped, capture exiting");
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {e}, recovering...");
                if let Err(e2) = pcm.prepare() {
                    log::error!("failed to recover capture device: {e2}");
                    break;
                }
            }
        }
    }

    log::info!("capture stopped");
}

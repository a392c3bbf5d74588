//! Session lifecycle: the state machine that owns one live voice
//! conversation end to end.
//!
//! A [`SessionController`] starts and stops sessions; each running
//! session is a spawned driver task that wires the capture pipeline,
//! the duplex channel, and the playback scheduler together and pumps
//! events between them until something ends the conversation. Status
//! flows out over a watch channel so observers (the CLI, the level
//! visualizer) never sit on the audio path.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::analyzer::Analyzer;
use crate::audio::{AudioFrame, CaptureConfig, CaptureHandle, OutputConfig};
use crate::channel::{ChannelConfig, ChannelEvent, LiveChannel};
use crate::codec::{self, PLAYBACK_SAMPLE_RATE};
use crate::config::Config;
use crate::error::VoiceError;
use crate::playback::{OutputDevice, PlaybackEvent, PlaybackScheduler};
use crate::transcript::TranscriptBuffer;

/// Internal lifecycle phase of the driver task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Open,
    Closing,
    Errored,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Open => "open",
            Phase::Closing => "closing",
            Phase::Errored => "errored",
        };
        f.write_str(name)
    }
}

fn transition(session: &str, from: Phase, to: Phase) -> Phase {
    log::info!("[{session}] {from} -> {to}");
    to
}

/// Externally visible phase. Closing and error handling are internal
/// detail; observers only see connecting, connected, or idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublicPhase {
    Connecting,
    Connected,
    #[default]
    Idle,
}

/// Snapshot published on every observable change.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub phase: PublicPhase,
    /// What the user has said, accumulated across turns.
    pub input_transcript: String,
    /// What the assistant has said, accumulated across turns.
    pub output_transcript: String,
    /// Set when the last session ended in failure; cleared on start.
    pub error: Option<String>,
}

/// Factory seam for everything a session acquires at start.
///
/// Production uses the ALSA and WebSocket implementations; tests plug
/// in fakes and drive the controller without hardware or a network.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn open_channel(
        &self,
        config: &ChannelConfig,
    ) -> Result<(Box<dyn LiveChannel>, mpsc::Receiver<ChannelEvent>), VoiceError>;

    fn open_output(
        &self,
        config: &OutputConfig,
    ) -> Result<(Arc<dyn OutputDevice>, mpsc::Receiver<PlaybackEvent>), VoiceError>;

    fn start_capture(
        &self,
        config: &CaptureConfig,
        analyzer: Arc<Analyzer>,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<CaptureHandle, VoiceError>;
}

struct ActiveSession {
    stop_tx: mpsc::Sender<()>,
    driver: JoinHandle<()>,
}

pub struct SessionController {
    config: Config,
    backend: Arc<dyn SessionBackend>,
    analyzer: Arc<Analyzer>,
    status_tx: watch::Sender<SessionStatus>,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(config: Config, backend: Arc<dyn SessionBackend>) -> Self {
        let analyzer = Arc::new(Analyzer::new(config.analyzer_fft_size));
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            config,
            backend,
            analyzer,
            status_tx,
            active: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Shared analyzer handle, for visualizers.
    pub fn analyzer(&self) -> Arc<Analyzer> {
        self.analyzer.clone()
    }

    /// Begin a new session. Non-blocking: resource acquisition and the
    /// connection handshake happen on the driver task, with failures
    /// reported through the status channel.
    ///
    /// Rejected while a session is already running.
    pub fn start(&mut self) -> Result<(), VoiceError> {
        if let Some(active) = &self.active {
            if !active.driver.is_finished() {
                return Err(VoiceError::SessionActive);
            }
            self.active = None;
        }

        let session = Uuid::new_v4().to_string()[..8].to_string();
        log::info!("[{session}] starting session");
        self.status_tx.send_replace(SessionStatus {
            phase: PublicPhase::Connecting,
            ..SessionStatus::default()
        });

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let driver = tokio::spawn(drive_session(
            session,
            self.config.clone(),
            self.backend.clone(),
            self.analyzer.clone(),
            self.status_tx.clone(),
            stop_rx,
        ));
        self.active = Some(ActiveSession { stop_tx, driver });
        Ok(())
    }

    /// Ask the running session to wind down and wait until it has.
    /// A no-op when nothing is running.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let _ = active.stop_tx.send(()).await;
        let _ = active.driver.await;
    }
}

/// Everything one open session holds.
struct SessionParts {
    channel: Option<Box<dyn LiveChannel>>,
    events: mpsc::Receiver<ChannelEvent>,
    capture: Option<CaptureHandle>,
    frames: mpsc::Receiver<AudioFrame>,
    playback_events: mpsc::Receiver<PlaybackEvent>,
    output: Arc<dyn OutputDevice>,
    scheduler: PlaybackScheduler,
}

enum Outcome {
    Stopped,
    RemoteClosed,
    Failed(String),
}

async fn drive_session(
    session: String,
    config: Config,
    backend: Arc<dyn SessionBackend>,
    analyzer: Arc<Analyzer>,
    status_tx: watch::Sender<SessionStatus>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let mut phase = transition(&session, Phase::Idle, Phase::Connecting);

    // Stop may arrive while we are still acquiring resources; partial
    // acquisitions are released by Drop.
    let parts = tokio::select! {
        _ = stop_rx.recv() => {
            phase = transition(&session, phase, Phase::Closing);
            publish_idle(&status_tx, None);
            transition(&session, phase, Phase::Idle);
            return;
        }
        parts = connect(&config, &backend, &analyzer) => parts,
    };

    let mut parts = match parts {
        Ok(parts) => parts,
        Err(e) => {
            phase = transition(&session, phase, Phase::Errored);
            log::error!("[{session}] session failed to open: {e}");
            publish_idle(&status_tx, Some(e.to_string()));
            transition(&session, phase, Phase::Idle);
            return;
        }
    };

    phase = transition(&session, phase, Phase::Open);
    status_tx.send_modify(|s| s.phase = PublicPhase::Connected);

    let outcome = run_open(&session, &config, &mut parts, &status_tx, &mut stop_rx).await;

    let error = match outcome {
        Outcome::Stopped => {
            phase = transition(&session, phase, Phase::Closing);
            None
        }
        Outcome::RemoteClosed => {
            phase = transition(&session, phase, Phase::Closing);
            log::info!("[{session}] remote side ended the session");
            None
        }
        Outcome::Failed(message) => {
            phase = transition(&session, phase, Phase::Errored);
            log::error!("[{session}] session failed: {message}");
            Some(message)
        }
    };

    teardown(&session, parts).await;
    publish_idle(&status_tx, error);
    transition(&session, phase, Phase::Idle);
}

/// Final status of a finished session: transcripts belong to the dead
/// conversation and are cleared along with the phase.
fn publish_idle(status_tx: &watch::Sender<SessionStatus>, error: Option<String>) {
    status_tx.send_replace(SessionStatus {
        phase: PublicPhase::Idle,
        error,
        ..SessionStatus::default()
    });
}

/// Acquire speaker, microphone, and channel, in that order. Anything
/// acquired before a later failure is released before returning.
async fn connect(
    config: &Config,
    backend: &Arc<dyn SessionBackend>,
    analyzer: &Arc<Analyzer>,
) -> Result<SessionParts, VoiceError> {
    let (output, playback_events) = backend.open_output(&config.output_config())?;

    let (frame_tx, frames) = mpsc::channel(config.frame_queue_depth);
    let capture = match backend.start_capture(&config.capture_config(), analyzer.clone(), frame_tx)
    {
        Ok(capture) => capture,
        Err(e) => {
            output.shutdown();
            return Err(e);
        }
    };

    let (channel, events) = match backend.open_channel(&config.channel_config()).await {
        Ok(opened) => opened,
        Err(e) => {
            drop(capture);
            output.shutdown();
            return Err(e);
        }
    };

    let scheduler = PlaybackScheduler::new(output.clone());
    Ok(SessionParts {
        channel: Some(channel),
        events,
        capture: Some(capture),
        frames,
        playback_events,
        output,
        scheduler,
    })
}

/// Event pump for an open session. Returns when the session should end.
async fn run_open(
    session: &str,
    config: &Config,
    parts: &mut SessionParts,
    status_tx: &watch::Sender<SessionStatus>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Outcome {
    let mut input_transcript = TranscriptBuffer::default();
    let mut output_transcript = TranscriptBuffer::default();
    let mut sequence: u64 = 0;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                return Outcome::Stopped;
            }

            frame = parts.frames.recv() => {
                let Some(frame) = frame else {
                    return Outcome::Failed(
                        "capture pipeline stopped unexpectedly".to_string(),
                    );
                };
                let blob = codec::encode_frame(&frame.samples);
                if let Some(channel) = parts.channel.as_mut() {
                    if let Err(e) = channel.send_audio(blob).await {
                        return Outcome::Failed(format!("audio send failed: {e}"));
                    }
                }
            }

            event = parts.events.recv() => {
                match event {
                    Some(ChannelEvent::InputTranscript(text)) => {
                        input_transcript.push(&text);
                        let joined = input_transcript.text().to_string();
                        status_tx.send_modify(|s| s.input_transcript = joined);
                    }
                    Some(ChannelEvent::OutputTranscript(text)) => {
                        output_transcript.push(&text);
                        let joined = output_transcript.text().to_string();
                        status_tx.send_modify(|s| s.output_transcript = joined);
                    }
                    Some(ChannelEvent::Audio(blob)) => {
                        sequence += 1;
                        let rate = codec::rate_from_mime(&blob.mime_type)
                            .unwrap_or(PLAYBACK_SAMPLE_RATE);
                        match codec::decode_chunk(&blob.data, rate, 1, sequence) {
                            Ok(chunk) => parts.scheduler.enqueue(chunk),
                            // One bad chunk never ends the session.
                            Err(e) => {
                                log::warn!("[{session}] skipping bad audio chunk: {e}");
                            }
                        }
                    }
                    Some(ChannelEvent::TurnComplete) => {
                        log::debug!("[{session}] turn complete");
                        if config.reset_on_turn_complete {
                            input_transcript.reset();
                            output_transcript.reset();
                            status_tx.send_modify(|s| {
                                s.input_transcript.clear();
                                s.output_transcript.clear();
                            });
                        }
                    }
                    Some(ChannelEvent::Interrupted) => {
                        parts.scheduler.interrupt();
                    }
                    Some(ChannelEvent::Error(message)) => {
                        return Outcome::Failed(message);
                    }
                    Some(ChannelEvent::Closed) | None => {
                        return Outcome::RemoteClosed;
                    }
                }
            }

            playback = parts.playback_events.recv() => {
                match playback {
                    Some(PlaybackEvent::Ended(id)) => {
                        parts.scheduler.on_source_ended(id);
                    }
                    None => {
                        return Outcome::Failed(
                            "output device stopped unexpectedly".to_string(),
                        );
                    }
                }
            }
        }
    }
}

/// Release everything, in every case. Each step is independent so one
/// failure never strands another resource.
async fn teardown(session: &str, mut parts: SessionParts) {
    if let Some(mut channel) = parts.channel.take() {
        if let Err(e) = channel.close().await {
            log::warn!("[{session}] channel close: {e}");
        }
    }
    if let Some(mut capture) = parts.capture.take() {
        capture.stop();
    }
    parts.scheduler.interrupt();
    parts.output.shutdown();
    log::info!("[{session}] session resources released");
}

//! End-to-end session lifecycle tests against an in-memory backend:
//! no sound hardware, no network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::timeout;

use bobur_voice_rs::analyzer::Analyzer;
use bobur_voice_rs::audio::{AudioFrame, CaptureConfig, CaptureHandle, OutputConfig};
use bobur_voice_rs::channel::{ChannelConfig, ChannelEvent, LiveChannel};
use bobur_voice_rs::codec::{self, InboundAudioChunk, TransportBlob};
use bobur_voice_rs::config::Config;
use bobur_voice_rs::error::VoiceError;
use bobur_voice_rs::playback::{OutputDevice, PlaybackEvent, PlaybackId};
use bobur_voice_rs::session::{PublicPhase, SessionBackend, SessionController, SessionStatus};

#[derive(Default)]
struct RecordingOutput {
    clock: Mutex<f64>,
    next_id: AtomicU64,
    started: Mutex<Vec<PlaybackId>>,
    stopped: Mutex<Vec<PlaybackId>>,
}

impl OutputDevice for RecordingOutput {
    fn current_time(&self) -> f64 {
        *self.clock.lock().unwrap()
    }

    fn start_source(&self, _chunk: InboundAudioChunk, _at: f64) -> PlaybackId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(id);
        id
    }

    fn stop_source(&self, id: PlaybackId) {
        self.stopped.lock().unwrap().push(id);
    }

    fn shutdown(&self) {}
}

struct MockChannel {
    sent: Arc<Mutex<Vec<TransportBlob>>>,
}

#[async_trait]
impl LiveChannel for MockChannel {
    async fn send_audio(&mut self, blob: TransportBlob) -> Result<(), VoiceError> {
        self.sent.lock().unwrap().push(blob);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), VoiceError> {
        Ok(())
    }
}

/// Backend whose every seam is observable and injectable from a test.
struct MockBackend {
    output: Arc<RecordingOutput>,
    sent: Arc<Mutex<Vec<TransportBlob>>>,
    event_tx: mpsc::Sender<ChannelEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
    playback_tx: mpsc::Sender<PlaybackEvent>,
    playback_rx: Mutex<Option<mpsc::Receiver<PlaybackEvent>>>,
    /// Filled in when the controller starts capture.
    frame_tx: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    /// When set, `open_channel` waits here forever.
    connect_gate: Option<Arc<Notify>>,
    fail_capture: Option<String>,
}

impl MockBackend {
    fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (playback_tx, playback_rx) = mpsc::channel(32);
        Self {
            output: Arc::new(RecordingOutput::default()),
            sent: Arc::new(Mutex::new(Vec::new())),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            playback_tx,
            playback_rx: Mutex::new(Some(playback_rx)),
            frame_tx: Arc::new(Mutex::new(None)),
            connect_gate: None,
            fail_capture: None,
        }
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    async fn open_channel(
        &self,
        _config: &ChannelConfig,
    ) -> Result<(Box<dyn LiveChannel>, mpsc::Receiver<ChannelEvent>), VoiceError> {
        if let Some(gate) = &self.connect_gate {
            gate.notified().await;
        }
        let events = self
            .event_rx
            .lock()
            .unwrap()
            .take()
            .expect("channel opened twice");
        Ok((
            Box::new(MockChannel {
                sent: self.sent.clone(),
            }),
            events,
        ))
    }

    fn open_output(
        &self,
        _config: &OutputConfig,
    ) -> Result<(Arc<dyn OutputDevice>, mpsc::Receiver<PlaybackEvent>), VoiceError> {
        let events = self
            .playback_rx
            .lock()
            .unwrap()
            .take()
            .expect("output opened twice");
        Ok((self.output.clone(), events))
    }

    fn start_capture(
        &self,
        _config: &CaptureConfig,
        _analyzer: Arc<Analyzer>,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<CaptureHandle, VoiceError> {
        if let Some(message) = &self.fail_capture {
            return Err(VoiceError::Permission(message.clone()));
        }
        *self.frame_tx.lock().unwrap() = Some(frames);
        Ok(CaptureHandle::detached())
    }
}

async fn wait_for<F>(status: &mut watch::Receiver<SessionStatus>, mut predicate: F) -> SessionStatus
where
    F: FnMut(&SessionStatus) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&status.borrow()) {
                return status.borrow().clone();
            }
            status.changed().await.expect("status channel closed");
        }
    })
    .await
    .expect("timed out waiting for session status")
}

async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}

fn connected_controller(backend: MockBackend) -> (SessionController, Arc<MockBackend>) {
    let backend = Arc::new(backend);
    let controller = SessionController::new(Config::default(), backend.clone());
    (controller, backend)
}

fn audio_event(seconds: f64) -> ChannelEvent {
    let samples = vec![0.1_f32; (seconds * 16_000.0) as usize];
    ChannelEvent::Audio(codec::encode_frame(&samples))
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let (mut controller, _backend) = connected_controller(MockBackend::new());
    let mut status = controller.subscribe();

    controller.start().unwrap();
    assert!(matches!(controller.start(), Err(VoiceError::SessionActive)));

    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;
    controller.stop().await;
}

#[tokio::test]
async fn captured_frames_are_encoded_and_sent() {
    let (mut controller, backend) = connected_controller(MockBackend::new());
    let mut status = controller.subscribe();
    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;

    let frame_tx = backend.frame_tx.lock().unwrap().clone().unwrap();
    frame_tx
        .send(AudioFrame {
            samples: vec![0.25; 4096],
        })
        .await
        .unwrap();

    wait_until(|| !backend.sent.lock().unwrap().is_empty()).await;
    let sent = backend.sent.lock().unwrap();
    assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");
    assert!(!sent[0].data.is_empty());
    drop(sent);

    controller.stop().await;
}

#[tokio::test]
async fn inbound_audio_is_scheduled_and_interruption_stops_it() {
    let (mut controller, backend) = connected_controller(MockBackend::new());
    let mut status = controller.subscribe();
    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;

    backend.event_tx.send(audio_event(0.5)).await.unwrap();
    backend.event_tx.send(audio_event(0.5)).await.unwrap();
    wait_until(|| backend.output.started.lock().unwrap().len() == 2).await;
    assert!(backend.output.stopped.lock().unwrap().is_empty());

    backend.event_tx.send(ChannelEvent::Interrupted).await.unwrap();
    wait_until(|| backend.output.stopped.lock().unwrap().len() == 2).await;

    controller.stop().await;
}

#[tokio::test]
async fn playback_completion_deregisters_sources() {
    let (mut controller, backend) = connected_controller(MockBackend::new());
    let mut status = controller.subscribe();
    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;

    backend.event_tx.send(audio_event(0.25)).await.unwrap();
    wait_until(|| backend.output.started.lock().unwrap().len() == 1).await;

    let id = backend.output.started.lock().unwrap()[0];
    backend
        .playback_tx
        .send(PlaybackEvent::Ended(id))
        .await
        .unwrap();

    // A later interruption has nothing left to stop.
    backend.event_tx.send(ChannelEvent::Interrupted).await.unwrap();
    backend
        .event_tx
        .send(ChannelEvent::InputTranscript("sync".to_string()))
        .await
        .unwrap();
    wait_for(&mut status, |s| !s.input_transcript.is_empty()).await;
    assert!(backend.output.stopped.lock().unwrap().is_empty());

    controller.stop().await;
}

#[tokio::test]
async fn transcripts_accumulate_across_turns() {
    let (mut controller, backend) = connected_controller(MockBackend::new());
    let mut status = controller.subscribe();
    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;

    for event in [
        ChannelEvent::InputTranscript("Salom".to_string()),
        ChannelEvent::OutputTranscript("Va alaykum".to_string()),
        ChannelEvent::TurnComplete,
        ChannelEvent::InputTranscript("dunyo".to_string()),
        ChannelEvent::OutputTranscript("assalom".to_string()),
    ] {
        backend.event_tx.send(event).await.unwrap();
    }

    let snapshot = wait_for(&mut status, |s| s.input_transcript == "Salom dunyo").await;
    assert_eq!(snapshot.output_transcript, "Va alaykum assalom");

    controller.stop().await;
}

#[tokio::test]
async fn stopping_clears_transcripts_from_public_status() {
    let (mut controller, backend) = connected_controller(MockBackend::new());
    let mut status = controller.subscribe();
    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;

    backend
        .event_tx
        .send(ChannelEvent::InputTranscript("qoldiq".to_string()))
        .await
        .unwrap();
    backend
        .event_tx
        .send(ChannelEvent::OutputTranscript("matn".to_string()))
        .await
        .unwrap();
    wait_for(&mut status, |s| !s.output_transcript.is_empty()).await;

    controller.stop().await;

    let snapshot = wait_for(&mut status, |s| s.phase == PublicPhase::Idle).await;
    assert!(snapshot.input_transcript.is_empty());
    assert!(snapshot.output_transcript.is_empty());
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn turn_complete_resets_transcripts_when_configured() {
    let backend = Arc::new(MockBackend::new());
    let config = Config {
        reset_on_turn_complete: true,
        ..Config::default()
    };
    let mut controller = SessionController::new(config, backend.clone());
    let mut status = controller.subscribe();
    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;

    backend
        .event_tx
        .send(ChannelEvent::InputTranscript("birinchi".to_string()))
        .await
        .unwrap();
    wait_for(&mut status, |s| s.input_transcript == "birinchi").await;

    backend.event_tx.send(ChannelEvent::TurnComplete).await.unwrap();
    wait_for(&mut status, |s| s.input_transcript.is_empty()).await;

    backend
        .event_tx
        .send(ChannelEvent::InputTranscript("ikkinchi".to_string()))
        .await
        .unwrap();
    let snapshot = wait_for(&mut status, |s| !s.input_transcript.is_empty()).await;
    assert_eq!(snapshot.input_transcript, "ikkinchi");

    controller.stop().await;
}

#[tokio::test]
async fn malformed_audio_chunk_does_not_end_the_session() {
    let (mut controller, backend) = connected_controller(MockBackend::new());
    let mut status = controller.subscribe();
    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;

    backend
        .event_tx
        .send(ChannelEvent::Audio(TransportBlob {
            data: "!!! not base64 !!!".to_string(),
            mime_type: "audio/pcm;rate=24000".to_string(),
        }))
        .await
        .unwrap();
    backend
        .event_tx
        .send(ChannelEvent::OutputTranscript("still here".to_string()))
        .await
        .unwrap();

    let snapshot = wait_for(&mut status, |s| !s.output_transcript.is_empty()).await;
    assert_eq!(snapshot.phase, PublicPhase::Connected);
    assert!(backend.output.started.lock().unwrap().is_empty());

    controller.stop().await;
}

#[tokio::test]
async fn channel_error_ends_session_with_error() {
    let (mut controller, backend) = connected_controller(MockBackend::new());
    let mut status = controller.subscribe();
    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;

    backend
        .event_tx
        .send(ChannelEvent::Error("stream reset".to_string()))
        .await
        .unwrap();

    let snapshot = wait_for(&mut status, |s| s.phase == PublicPhase::Idle).await;
    assert_eq!(snapshot.error.as_deref(), Some("stream reset"));
}

#[tokio::test]
async fn remote_close_ends_session_cleanly() {
    let (mut controller, backend) = connected_controller(MockBackend::new());
    let mut status = controller.subscribe();
    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connected).await;

    backend.event_tx.send(ChannelEvent::Closed).await.unwrap();

    let snapshot = wait_for(&mut status, |s| s.phase == PublicPhase::Idle).await;
    assert!(snapshot.error.is_none());

    // The controller may be started again once the session is over.
    controller.stop().await;
}

#[tokio::test]
async fn stop_while_connecting_unwinds_cleanly() {
    let mut backend = MockBackend::new();
    backend.connect_gate = Some(Arc::new(Notify::new()));
    let (mut controller, _backend) = connected_controller(backend);
    let mut status = controller.subscribe();

    controller.start().unwrap();
    wait_for(&mut status, |s| s.phase == PublicPhase::Connecting).await;

    controller.stop().await;
    let snapshot = wait_for(&mut status, |s| s.phase == PublicPhase::Idle).await;
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn microphone_permission_failure_is_reported() {
    let mut backend = MockBackend::new();
    backend.fail_capture = Some("microphone 'default' refused access".to_string());
    let (mut controller, _backend) = connected_controller(backend);
    let mut status = controller.subscribe();

    controller.start().unwrap();
    let snapshot = wait_for(&mut status, |s| s.phase == PublicPhase::Idle).await;
    let error = snapshot.error.expect("expected a session error");
    assert!(error.contains("refused access"), "got: {error}");
}

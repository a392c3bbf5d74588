//! Duplex channel to the remote generative-audio service.
//!
//! [`LiveChannel`] is the seam the session controller talks through:
//! fire-and-forget audio upstream, an event stream downstream, and an
//! idempotent close. [`WsLiveChannel`] is the production WebSocket
//! implementation; tests substitute an in-memory fake.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::codec::TransportBlob;
use crate::error::VoiceError;
use crate::protocol::{RealtimeInputMessage, ServerMessage, SetupMessage};

/// Fixed configuration for one channel, decided at session start.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Named synthetic voice for the response audio.
    pub voice: String,
    /// Persona, factual grounding, and response-language policy.
    pub system_instruction: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

/// Asynchronous messages delivered by the channel, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    InputTranscript(String),
    OutputTranscript(String),
    Audio(TransportBlob),
    TurnComplete,
    /// The user started speaking over synthesized output; all in-flight
    /// playback must stop immediately.
    Interrupted,
    Error(String),
    Closed,
}

/// Outbound half of the duplex channel.
#[async_trait]
pub trait LiveChannel: Send {
    /// Fire-and-forget, at-most-once delivery per frame.
    async fn send_audio(&mut self, blob: TransportBlob) -> Result<(), VoiceError>;

    /// Idempotent close; safe to call on an already-closed channel.
    async fn close(&mut self) -> Result<(), VoiceError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket-backed channel.
///
/// There is no automatic reconnect: a dropped channel ends the session
/// and reconnection is a new user-initiated start.
pub struct WsLiveChannel {
    write: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
}

impl WsLiveChannel {
    /// Open the channel: connect, send the setup message, and wait for
    /// the server's setup acknowledgement before handing out the event
    /// stream.
    pub async fn connect(
        config: &ChannelConfig,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), VoiceError> {
        Url::parse(&config.endpoint)
            .map_err(|e| VoiceError::Channel(format!("invalid endpoint: {e}")))?;
        let request = format!("{}?key={}", config.endpoint, config.api_key);

        log::info!("connecting to {}", config.endpoint);
        let (ws, _) = connect_async(&request)
            .await
            .map_err(|e| VoiceError::Channel(format!("connect failed: {e}")))?;
        let (mut write, mut read) = ws.split();

        let setup = serde_json::to_string(&SetupMessage::new(config))
            .map_err(|e| VoiceError::Channel(format!("setup serialization failed: {e}")))?;
        write
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| VoiceError::Channel(format!("setup send failed: {e}")))?;

        Self::await_setup_complete(&mut read).await?;
        log::info!("channel open, setup acknowledged");

        let (event_tx, event_rx) = mpsc::channel(100);
        let reader = tokio::spawn(read_loop(read, event_tx));

        Ok((
            Self {
                write: Some(write),
                reader: Some(reader),
            },
            event_rx,
        ))
    }

    async fn await_setup_complete(read: &mut SplitStream<WsStream>) -> Result<(), VoiceError> {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if ServerMessage::parse(&text)?.is_setup_complete() {
                        return Ok(());
                    }
                    log::warn!("unexpected frame before setup acknowledgement");
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(VoiceError::Channel(
                        "connection closed during setup".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(VoiceError::Channel(format!("setup read failed: {e}")));
                }
            }
        }
    }
}

async fn read_loop(mut read: SplitStream<WsStream>, tx: mpsc::Sender<ChannelEvent>) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if dispatch_frame(&text, &tx).await.is_err() {
                    return;
                }
            }
            // Some deployments deliver the same JSON frames as binary.
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    if dispatch_frame(text, &tx).await.is_err() {
                        return;
                    }
                }
                Err(_) => log::warn!("ignoring non-UTF-8 binary frame ({} bytes)", data.len()),
            },
            Ok(Message::Close(frame)) => {
                log::info!("server closed connection: {frame:?}");
                let _ = tx.send(ChannelEvent::Closed).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = tx.send(ChannelEvent::Error(e.to_string())).await;
                return;
            }
        }
    }
    let _ = tx.send(ChannelEvent::Closed).await;
}

/// Parse one frame and forward its events. A malformed frame is logged
/// and skipped; the error return only signals that the session side has
/// gone away.
async fn dispatch_frame(text: &str, tx: &mpsc::Sender<ChannelEvent>) -> Result<(), ()> {
    let message = match ServerMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("skipping malformed server frame: {e}");
            return Ok(());
        }
    };
    for event in message.into_events() {
        if tx.send(event).await.is_err() {
            return Err(());
        }
    }
    Ok(())
}

impl Drop for WsLiveChannel {
    fn drop(&mut self) {
        // A dropped handle must not leave the reader task running.
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[async_trait]
impl LiveChannel for WsLiveChannel {
    async fn send_audio(&mut self, blob: TransportBlob) -> Result<(), VoiceError> {
        let Some(write) = self.write.as_mut() else {
            return Err(VoiceError::Channel("channel is closed".to_string()));
        };
        let json = serde_json::to_string(&RealtimeInputMessage::audio(blob))
            .map_err(|e| VoiceError::Channel(format!("frame serialization failed: {e}")))?;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| VoiceError::Channel(format!("send failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), VoiceError> {
        if let Some(mut write) = self.write.take() {
            let _ = write.send(Message::Close(None)).await;
            let _ = write.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        Ok(())
    }
}

//! Wire messages exchanged with the generative-audio service.
//!
//! The channel speaks JSON over a single duplex WebSocket: one `setup`
//! message opens the session, `realtimeInput` messages carry captured
//! audio upstream, and `serverContent` frames carry synthesized audio,
//! incremental transcripts, and turn/interruption signals downstream.

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelConfig, ChannelEvent};
use crate::codec::TransportBlob;
use crate::error::VoiceError;

// ======================== Client → server ========================

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<EmptyObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<EmptyObject>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    pub mime_type: String,
}

/// Serializes as `{}`; presence alone enables the feature.
#[derive(Debug, Serialize, Default)]
pub struct EmptyObject {}

impl SetupMessage {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            setup: Setup {
                model: config.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![Part {
                        text: Some(config.system_instruction.clone()),
                        inline_data: None,
                    }],
                },
                input_audio_transcription: config.input_transcription.then(EmptyObject::default),
                output_audio_transcription: config.output_transcription.then(EmptyObject::default),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub data: String,
    pub mime_type: String,
}

impl RealtimeInputMessage {
    pub fn audio(blob: TransportBlob) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    data: blob.data,
                    mime_type: blob.mime_type,
                }],
            },
        }
    }
}

// ======================== Server → client ========================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub turn_complete: bool,
    pub interrupted: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Transcription {
    pub text: String,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, VoiceError> {
        serde_json::from_str(text)
            .map_err(|e| VoiceError::Protocol(format!("unparseable server frame: {e}")))
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten one frame into dispatchable events, in the order the
    /// session consumes them: transcripts, audio, turn boundary,
    /// interruption.
    pub fn into_events(self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        let Some(content) = self.server_content else {
            return events;
        };
        if let Some(t) = content.input_transcription {
            if !t.text.is_empty() {
                events.push(ChannelEvent::InputTranscript(t.text));
            }
        }
        if let Some(t) = content.output_transcription {
            if !t.text.is_empty() {
                events.push(ChannelEvent::OutputTranscript(t.text));
            }
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    events.push(ChannelEvent::Audio(TransportBlob {
                        data: inline.data,
                        mime_type: inline.mime_type,
                    }));
                }
            }
        }
        if content.turn_complete {
            events.push(ChannelEvent::TurnComplete);
        }
        if content.interrupted {
            events.push(ChannelEvent::Interrupted);
        }
        events
    }
}

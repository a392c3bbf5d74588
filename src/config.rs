//! Runtime configuration, loaded from an optional TOML file with
//! environment overrides. Every field has a workable default so the
//! binary runs with no file at all (the API key usually comes from the
//! environment).

use serde::Deserialize;

use crate::audio::{CaptureConfig, OutputConfig};
use crate::channel::ChannelConfig;
use crate::codec::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};

const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a history expert and cultural guide \
     dedicated to the life and legacy of Zahiriddin Muhammad Bobur (1483-1530), the great \
     commander, poet, and historian. Key facts: he was born in Andijan, a descendant of \
     Amir Timur (Tamerlane); he founded the Mughal Empire (Boburiylar davlati) in India; \
     he wrote the Baburnama (Boburnoma), a unique historical and literary autobiography; \
     he was an accomplished poet in Chagatai (Old Uzbek) and Persian, known for patriotism, \
     longing for his Andijan and Fergana homeland, and keen observations of nature. If \
     asked in Uzbek, respond in modern literary Uzbek; in other languages, respond \
     accordingly with a scholarly and appreciative tone toward Central Asian history. Be \
     concise but descriptive, conversational and engaging, as suits live spoken dialogue.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub model: String,
    /// Explicit key; when absent the key is read from `api_key_env`.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub voice: String,
    pub system_instruction: String,
    /// Optional extra instruction appended to the persona, typically a
    /// response-language directive.
    pub language_note: Option<String>,
    /// Clear accumulated transcripts at each turn boundary instead of
    /// growing them for the whole conversation.
    pub reset_on_turn_complete: bool,
    /// Outbound frame queue depth; beyond this, frames are dropped.
    pub frame_queue_depth: usize,
    pub analyzer_fft_size: usize,
    pub capture: CaptureSettings,
    pub playback: PlaybackSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub device: String,
    pub sample_rate: u32,
    pub frame_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub device: String,
    pub sample_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            voice: "Puck".to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            language_note: None,
            reset_on_turn_complete: false,
            frame_queue_depth: 8,
            analyzer_fft_size: 256,
            capture: CaptureSettings::default(),
            playback: PlaybackSettings::default(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: CAPTURE_SAMPLE_RATE,
            frame_size: 4096,
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: PLAYBACK_SAMPLE_RATE,
        }
    }
}

impl Config {
    /// Load from `path` (missing file is fine) with `BOBUR_*`
    /// environment variables layered on top.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("BOBUR").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            device: self.capture.device.clone(),
            sample_rate: self.capture.sample_rate,
            frame_size: self.capture.frame_size,
        }
    }

    pub fn output_config(&self) -> OutputConfig {
        OutputConfig {
            device: self.playback.device.clone(),
            sample_rate: self.playback.sample_rate,
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => std::env::var(&self.api_key_env).unwrap_or_else(|_| {
                log::warn!("no API key configured ({} is unset)", self.api_key_env);
                String::new()
            }),
        };
        let system_instruction = match &self.language_note {
            Some(note) => format!("{}\n\n{note}", self.system_instruction),
            None => self.system_instruction.clone(),
        };
        ChannelConfig {
            endpoint: self.endpoint.clone(),
            api_key,
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction,
            input_transcription: true,
            output_transcription: true,
        }
    }
}

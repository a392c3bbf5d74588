//! Production backend: ALSA devices and the WebSocket channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::analyzer::Analyzer;
use crate::audio::{self, AlsaOutput, AudioFrame, CaptureConfig, CaptureHandle, OutputConfig};
use crate::channel::{ChannelConfig, ChannelEvent, LiveChannel, WsLiveChannel};
use crate::error::VoiceError;
use crate::playback::{OutputDevice, PlaybackEvent};
use crate::session::SessionBackend;

pub struct LiveBackend;

#[async_trait]
impl SessionBackend for LiveBackend {
    async fn open_channel(
        &self,
        config: &ChannelConfig,
    ) -> Result<(Box<dyn LiveChannel>, mpsc::Receiver<ChannelEvent>), VoiceError> {
        let (channel, events) = WsLiveChannel::connect(config).await?;
        Ok((Box::new(channel), events))
    }

    fn open_output(
        &self,
        config: &OutputConfig,
    ) -> Result<(Arc<dyn OutputDevice>, mpsc::Receiver<PlaybackEvent>), VoiceError> {
        let (output, events) = AlsaOutput::open(config)?;
        Ok((output, events))
    }

    fn start_capture(
        &self,
        config: &CaptureConfig,
        analyzer: Arc<Analyzer>,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<CaptureHandle, VoiceError> {
        audio::start_capture(config, analyzer, frames)
    }
}

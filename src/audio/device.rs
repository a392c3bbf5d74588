//! ALSA PCM device access shared by the capture and output threads.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use crate::error::VoiceError;

// errno values that mean the device exists but access was refused.
const EPERM: i32 = 1;
const EACCES: i32 = 13;

/// Parameters negotiated with the hardware, which may differ from what
/// was requested.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames.
    pub period_size: usize,
}

pub fn open_capture(
    name: &str,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, Negotiated), VoiceError> {
    open(name, Direction::Capture, sample_rate, channels)
}

pub fn open_playback(
    name: &str,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, Negotiated), VoiceError> {
    open(name, Direction::Playback, sample_rate, channels)
}

fn open(
    name: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, Negotiated), VoiceError> {
    let dir_name = match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    };
    let pcm = PCM::new(name, direction, false)
        .map_err(|e| classify_open_error(name, direction, dir_name, e))?;

    {
        let hwp = HwParams::any(&pcm).map_err(|e| device_err(name, dir_name, e))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| device_err(name, dir_name, e))?;
        hwp.set_format(Format::S16LE)
            .map_err(|e| device_err(name, dir_name, e))?;
        hwp.set_channels(channels)
            .map_err(|e| device_err(name, dir_name, e))?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)
            .map_err(|e| device_err(name, dir_name, e))?;
        pcm.hw_params(&hwp)
            .map_err(|e| device_err(name, dir_name, e))?;
    }

    let negotiated = {
        let hwp = pcm
            .hw_params_current()
            .map_err(|e| device_err(name, dir_name, e))?;
        Negotiated {
            sample_rate: hwp.get_rate().map_err(|e| device_err(name, dir_name, e))?,
            channels: hwp
                .get_channels()
                .map_err(|e| device_err(name, dir_name, e))?,
            period_size: hwp
                .get_period_size()
                .map_err(|e| device_err(name, dir_name, e))? as usize,
        }
    };

    log::info!(
        "ALSA {dir_name}: device={name}, rate={}, channels={}, period_size={}",
        negotiated.sample_rate,
        negotiated.channels,
        negotiated.period_size,
    );

    Ok((pcm, negotiated))
}

fn classify_open_error(
    name: &str,
    direction: Direction,
    dir_name: &str,
    e: alsa::Error,
) -> VoiceError {
    let refused = matches!(e.errno(), EPERM | EACCES);
    if refused && matches!(direction, Direction::Capture) {
        VoiceError::Permission(format!("microphone '{name}' refused access: {e}"))
    } else {
        device_err(name, dir_name, e)
    }
}

fn device_err(name: &str, dir_name: &str, e: alsa::Error) -> VoiceError {
    VoiceError::Device(format!("{dir_name} device '{name}': {e}"))
}

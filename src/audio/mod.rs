//! Audio device layer: ALSA capture and playback in dedicated OS
//! threads, bridged into async land over mpsc channels.
//!
//! Real-time I/O stays off the tokio runtime so a stalled network task
//! can never starve the hardware.

pub mod capture;
mod device;
pub mod output;

pub use capture::{AudioFrame, CaptureConfig, CaptureHandle, start_capture};
pub use output::{AlsaOutput, OutputConfig};

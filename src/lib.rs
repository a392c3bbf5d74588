//! Realtime voice conversation client: microphone capture, a duplex
//! channel to a generative-audio service, and gapless scheduled
//! playback of the synthesized replies.

pub mod analyzer;
pub mod audio;
pub mod backend;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transcript;
pub mod visualizer;

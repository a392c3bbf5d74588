//! Error taxonomy for the voice session core.

use thiserror::Error;

/// Errors surfaced by the session core.
///
/// `Permission` and `Device` abort connection setup and are surfaced to
/// the user without retry. `Channel` during an open session forces a
/// full teardown. `Codec` on a single inbound chunk is non-fatal: the
/// chunk is skipped and the conversation continues. `Protocol` marks an
/// unexpected message shape from the remote side.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("microphone permission denied: {0}")]
    Permission(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// `start()` was called while another session is still live. The
    /// running session is left untouched.
    #[error("a session is already active")]
    SessionActive,
}

pub type Result<T> = std::result::Result<T, VoiceError>;

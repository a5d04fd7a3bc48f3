//! Error types for modem operations

use super::transport::TransportError;
use thiserror::Error;

/// Longest SMS body accepted for transmission, in characters
pub const MAX_MESSAGE_LEN: usize = 140;

/// Errors produced by the command engine, façade, SMS subsystem and session
#[derive(Error, Debug)]
pub enum ModemError {
    /// Transaction attempted while the session is not connected
    #[error("Not connected to modem")]
    NotConnected,

    /// The transport produced no data within the read window
    #[error("No response within {0} ms")]
    Timeout(u64),

    /// SMS body exceeds the single-message limit
    #[error("Message too long: {len} characters (limit {MAX_MESSAGE_LEN})")]
    MessageTooLong {
        /// Body length in characters
        len: usize,
    },

    /// Response could not be parsed
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Name outside the closed status/setting set
    #[error("Unknown option: {0}")]
    UnknownOption(String),

    /// Modem answered with a final error result code
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Transport level failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ModemError {
    /// Whether this error means the link itself is unusable.
    ///
    /// The session drops to `Disconnected` on these; everything else is a
    /// per-command failure and leaves the link up.
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

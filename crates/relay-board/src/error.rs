//! Error types for the relay board link

use thiserror::Error;

use crate::verification::SafetyViolation;

/// Errors that can occur talking to the relay board
#[derive(Debug, Error)]
pub enum LinkError {
    /// Mutating command without a confirmed verification
    #[error(transparent)]
    Safety(#[from] SafetyViolation),

    /// I/O error on the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to open a serial port
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// Board did not identify with the expected firmware prefix
    #[error("board identified as {version:?}, expected prefix {prefix:?}")]
    Handshake { version: String, prefix: String },

    /// Board reply did not match the issued command
    #[error("unexpected reply to {command:?}: {reply:?}")]
    UnexpectedReply { command: String, reply: String },

    /// Board stopped answering queries
    #[error("timed out waiting for reply to {command:?}")]
    ReplyTimeout { command: String },

    /// No board answered the handshake on any candidate port
    #[error("no relay board found on any serial port")]
    NoBoardFound,
}

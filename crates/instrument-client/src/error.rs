//! Error types for the instrument client

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on a proxied instrument call
#[derive(Debug, Error)]
pub enum ClientError {
    /// No live connection (never connected, or marked dead by an earlier
    /// failure)
    #[error("not connected to instrument server")]
    NotConnected,

    /// Failed to establish a connection
    #[error("failed to connect to instrument server at {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// Request did not complete within the configured timeout
    #[error("request {method:?} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// Connection broke mid-request
    #[error("connection to instrument server lost: {0}")]
    ConnectionLost(String),

    /// Reply was not a valid frame
    #[error("invalid reply from instrument server: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Server executed the request and reported a failure
    #[error("instrument server error: {0}")]
    Server(String),
}

impl ClientError {
    /// Whether this error is in the transport class that warrants one
    /// transparent reconnect-and-retry
    ///
    /// Server-side and protocol errors are excluded: retrying them would
    /// re-execute a request the server already saw.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected
                | ClientError::Timeout { .. }
                | ClientError::ConnectionLost(_)
        )
    }
}

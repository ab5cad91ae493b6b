//! Error types for the switch engine

use instrument_client::ClientError;
use relay_board::{LinkError, SafetyViolation};
use switch_tree::TreeError;
use thiserror::Error;

/// Errors that can occur during an actuation sequence
#[derive(Debug, Error)]
pub enum EngineError {
    /// Mutating operation without a confirmed verification
    #[error(transparent)]
    Safety(#[from] SafetyViolation),

    /// Channel could not be resolved against the tree topology
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Relay board failure
    #[error("relay link error: {0}")]
    Link(#[from] LinkError),

    /// Instrument proxy failure (after its own retry)
    #[error("instrument proxy error: {0}")]
    Client(#[from] ClientError),

    /// I/O failure on a directly attached generator
    #[error("pulse generator I/O error: {0}")]
    Generator(#[from] std::io::Error),

    /// Operation needs the generator but it is not connected
    #[error("pulse generator is not connected")]
    GeneratorOffline,

    /// The active pulse driver has no generator to swap
    #[error("pulse driver has no generator")]
    NoGenerator,

    /// An instrument failed to confirm the expected post-action state
    ///
    /// Fatal for the operation: continuing to actuate with an unconfirmed
    /// amplifier state risks the hardware.
    #[error("hardware did not acknowledge: {0}")]
    HardwareAck(String),
}

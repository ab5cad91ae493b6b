//! Error types for tree routing

use thiserror::Error;

use crate::node::RelayId;

/// Errors that can occur while resolving a channel against the tree
///
/// All of these indicate a topology/channel mismatch rather than a
/// transient condition; callers must not retry them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Requested channel is not addressable by this tree
    #[error("channel {channel} outside addressable range {first}..={last}")]
    ChannelOutOfRange { channel: u8, first: u8, last: u8 },

    /// Walk terminated at a different output channel than requested
    #[error("walk for channel {channel} terminated at channel {reached}")]
    LeafMismatch { channel: u8, reached: u8 },

    /// Walk ran into an unconnected branch before reaching a leaf
    #[error("walk for channel {channel} dead-ended after {consumed} steps")]
    DeadEnd { channel: u8, consumed: usize },

    /// Walk consumed every address bit without reaching a leaf
    #[error("walk for channel {channel} did not reach a leaf within the tree depth")]
    Unterminated { channel: u8 },

    /// A branch references a relay that is not part of the tree
    #[error("relay {0} is not part of this tree")]
    UnknownRelay(RelayId),
}

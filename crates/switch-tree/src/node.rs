//! Relay node types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Board-numbered identity of a relay (R1 -> 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelayId(pub u8);

impl RelayId {
    /// Display name as used in snapshots ("R1".."R7")
    pub fn name(&self) -> String {
        format!("R{}", self.0)
    }

    /// Get the raw board index
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// What a relay output is wired to
///
/// A node's child is either another relay, a terminal output channel, or
/// nothing at all. The wiring is fixed at construction; only node polarity
/// ever changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Another relay further down the tree
    Node(RelayId),
    /// A terminal output channel
    Channel(u8),
    /// Not connected
    Empty,
}

/// A single latching relay in the routing tree
///
/// `polarity == false` selects the RIGHT child, `polarity == true` selects
/// the LEFT child. This mapping is a fixed hardware convention; getting it
/// backwards silently routes to the mirrored channel, so it is pinned by
/// the codec tests rather than configurable.
#[derive(Debug, Clone)]
pub struct RelayNode {
    /// Relay identity on the board
    pub id: RelayId,
    /// Which child is currently selected (false = right, true = left)
    pub polarity: bool,
    /// Whether this node lies on the path to the active channel (derived)
    pub in_use: bool,
    /// Left child
    pub left: Branch,
    /// Right child
    pub right: Branch,
}

impl RelayNode {
    /// Create a node with both polarity and in_use cleared
    pub fn new(id: RelayId, left: Branch, right: Branch) -> Self {
        Self {
            id,
            polarity: false,
            in_use: false,
            left,
            right,
        }
    }

    /// The child currently pointed to by this relay
    pub fn to_next(&self) -> Branch {
        if self.polarity {
            self.left
        } else {
            self.right
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_name_matches_board_numbering() {
        assert_eq!(RelayId(1).name(), "R1");
        assert_eq!(RelayId(7).to_string(), "R7");
    }

    #[test]
    fn to_next_follows_polarity_convention() {
        let mut node = RelayNode::new(RelayId(1), Branch::Channel(7), Branch::Channel(6));

        // Rest state points right
        assert_eq!(node.to_next(), Branch::Channel(6));

        node.polarity = true;
        assert_eq!(node.to_next(), Branch::Channel(7));
    }
}

//! Flattened tree state for observers
//!
//! Snapshots are the externally visible view of the tree: one
//! `{pos, color}` pair per relay plus the channel the current polarities
//! route to. They are rebuilt after every mutation and handed out by
//! value, so observers never see a half-updated tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tree::RoutingTree;

/// Externally visible state of one relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchState {
    /// Relay polarity (true = left branch selected)
    pub pos: bool,
    /// Whether the relay lies on the active path
    pub color: bool,
}

/// Flattened view of the whole tree
///
/// Serializes as `{"R1": {"pos": .., "color": ..}, ..,
/// "activated_channel": n}`, the shape the front end consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Per-relay state keyed by relay name
    #[serde(flatten)]
    pub relays: BTreeMap<String, SwitchState>,
    /// Channel the tree currently routes to
    pub activated_channel: u8,
}

impl TreeSnapshot {
    /// Capture the current state of a tree
    pub fn capture(tree: &RoutingTree) -> Self {
        let relays = tree
            .nodes()
            .map(|n| {
                (
                    n.id.name(),
                    SwitchState {
                        pos: n.polarity,
                        color: n.in_use,
                    },
                )
            })
            .collect();

        Self {
            relays,
            activated_channel: tree.active_channel().unwrap_or(0),
        }
    }

    /// Look up one relay's state by name ("R1".."R7")
    pub fn relay(&self, name: &str) -> Option<SwitchState> {
        self.relays.get(name).copied()
    }
}

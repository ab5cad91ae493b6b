//! Observer event stream
//!
//! Subscribers get a snapshot after every completed state change and
//! keep-alive frames while nothing is happening, so a stalled stream is
//! distinguishable from an idle one.

use switch_tree::TreeSnapshot;

/// Events pushed to tree observers
#[derive(Debug, Clone)]
pub enum SwitchEvent {
    /// The tree changed; this is the state after the full actuation
    /// sequence completed
    Snapshot(TreeSnapshot),
    /// Periodic idle frame
    KeepAlive,
}

impl SwitchEvent {
    /// The snapshot carried by this event, if any
    pub fn snapshot(&self) -> Option<&TreeSnapshot> {
        match self {
            SwitchEvent::Snapshot(snapshot) => Some(snapshot),
            SwitchEvent::KeepAlive => None,
        }
    }
}

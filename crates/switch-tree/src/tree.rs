//! Routing tree and the channel-to-path codec
//!
//! The codec converts a channel number into the sequence of relay polarity
//! changes along the root-to-leaf path: the channel is complemented against
//! the tree's bit mask, rendered as a fixed-width binary string, and walked
//! from the root one bit per level. Bit `0` selects the LEFT branch, bit
//! `1` the RIGHT branch. This convention comes straight from the deployed
//! hardware wiring and is pinned by the tests below.

use tracing::warn;

use crate::error::TreeError;
use crate::node::{Branch, RelayId, RelayNode};

/// Which branch a routing step selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Left child (polarity true)
    Left,
    /// Right child (polarity false)
    Right,
}

impl Direction {
    /// Polarity value a relay must hold to select this direction
    pub fn selects_left(self) -> bool {
        matches!(self, Direction::Left)
    }
}

/// One step of a routing path: drive `relay` to `direction`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Relay to actuate
    pub relay: RelayId,
    /// Desired direction for that relay
    pub direction: Direction,
}

/// A fixed binary tree of relays routing one line to N output channels
///
/// The structure is statically wired: nodes are never re-parented, only
/// their polarity changes. Following [`RelayNode::to_next`] from the root
/// always terminates because the tree has no back-edges.
#[derive(Debug, Clone)]
pub struct RoutingTree {
    nodes: Vec<RelayNode>,
    root: RelayId,
    first_channel: u8,
    last_channel: u8,
    depth: u8,
    active_channel: Option<u8>,
}

impl RoutingTree {
    /// The 8-channel cryogenic tree
    ///
    /// ```text
    ///            ___  R1 ____
    ///          /              \
    ///        R2                R3
    ///     /      \          /      \
    ///    R4       R5       R6       R7
    ///   /  \     /  \     /  \     /  \
    ///  7    6   5    4   3    2   1    0   # board channel numbering
    /// ```
    pub fn cryo8() -> Self {
        let nodes = vec![
            RelayNode::new(RelayId(1), Branch::Node(RelayId(2)), Branch::Node(RelayId(3))),
            RelayNode::new(RelayId(2), Branch::Node(RelayId(4)), Branch::Node(RelayId(5))),
            RelayNode::new(RelayId(3), Branch::Node(RelayId(6)), Branch::Node(RelayId(7))),
            RelayNode::new(RelayId(4), Branch::Channel(7), Branch::Channel(6)),
            RelayNode::new(RelayId(5), Branch::Channel(5), Branch::Channel(4)),
            RelayNode::new(RelayId(6), Branch::Channel(3), Branch::Channel(2)),
            RelayNode::new(RelayId(7), Branch::Channel(1), Branch::Channel(0)),
        ];
        Self::build(nodes, RelayId(1), 0, 7, 3)
    }

    /// The 7-channel wire-switching tree
    ///
    /// Routes a pulse generator's output to one of the board's coil lines
    /// 1..=7. R3's right output goes straight to line 1, so that walk
    /// resolves in two steps instead of three.
    pub fn wire7() -> Self {
        let nodes = vec![
            RelayNode::new(RelayId(1), Branch::Node(RelayId(2)), Branch::Node(RelayId(3))),
            RelayNode::new(RelayId(2), Branch::Node(RelayId(4)), Branch::Node(RelayId(5))),
            RelayNode::new(RelayId(3), Branch::Node(RelayId(6)), Branch::Channel(1)),
            RelayNode::new(RelayId(4), Branch::Channel(7), Branch::Channel(6)),
            RelayNode::new(RelayId(5), Branch::Channel(5), Branch::Channel(4)),
            RelayNode::new(RelayId(6), Branch::Channel(3), Branch::Channel(2)),
        ];
        Self::build(nodes, RelayId(1), 1, 7, 3)
    }

    fn build(
        nodes: Vec<RelayNode>,
        root: RelayId,
        first_channel: u8,
        last_channel: u8,
        depth: u8,
    ) -> Self {
        let mut tree = Self {
            nodes,
            root,
            first_channel,
            last_channel,
            depth,
            active_channel: None,
        };
        tree.refresh_active();
        tree
    }

    /// Root relay of the tree
    pub fn root(&self) -> RelayId {
        self.root
    }

    /// Number of relays in the tree
    pub fn relay_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over all nodes in board order
    pub fn nodes(&self) -> impl Iterator<Item = &RelayNode> {
        self.nodes.iter()
    }

    /// Addressable channel range (inclusive)
    pub fn channel_range(&self) -> (u8, u8) {
        (self.first_channel, self.last_channel)
    }

    /// Channel the selected polarities currently route to
    pub fn active_channel(&self) -> Option<u8> {
        self.active_channel
    }

    /// Look up a node by relay identity
    pub fn node(&self, id: RelayId) -> Option<&RelayNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: RelayId) -> Option<&mut RelayNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Set a relay's polarity directly
    pub fn set_polarity(&mut self, id: RelayId, polarity: bool) -> Result<(), TreeError> {
        let node = self.node_mut(id).ok_or(TreeError::UnknownRelay(id))?;
        node.polarity = polarity;
        Ok(())
    }

    /// Record the outcome of an actuated routing step
    pub fn apply_step(&mut self, step: Step) {
        if let Some(node) = self.node_mut(step.relay) {
            node.polarity = step.direction.selects_left();
        }
    }

    /// Compute the root-to-leaf actuation path for a channel
    ///
    /// Never touches node state. A malformed channel is rejected before any
    /// step is produced; a walk that does not end on the requested channel
    /// is a topology mismatch and fails as a whole.
    pub fn route_steps(&self, channel: u8) -> Result<Vec<Step>, TreeError> {
        if channel < self.first_channel || channel > self.last_channel {
            return Err(TreeError::ChannelOutOfRange {
                channel,
                first: self.first_channel,
                last: self.last_channel,
            });
        }

        // Complement against the full address mask, then walk one bit per
        // level, most significant bit first.
        let mask = (1u8 << self.depth) - 1;
        let complement = mask - channel;

        let mut steps = Vec::with_capacity(self.depth as usize);
        let mut cursor = Branch::Node(self.root);

        for level in (0..self.depth).rev() {
            let id = match cursor {
                Branch::Node(id) => id,
                Branch::Channel(reached) => {
                    // Legitimate early termination on trees with a shallow
                    // leaf, as long as we landed on the right channel.
                    if reached == channel {
                        return Ok(steps);
                    }
                    return Err(TreeError::LeafMismatch { channel, reached });
                }
                Branch::Empty => {
                    return Err(TreeError::DeadEnd {
                        channel,
                        consumed: steps.len(),
                    });
                }
            };

            let direction = if (complement >> level) & 1 == 0 {
                Direction::Left
            } else {
                Direction::Right
            };
            steps.push(Step { relay: id, direction });

            let node = self.node(id).ok_or(TreeError::UnknownRelay(id))?;
            cursor = match direction {
                Direction::Left => node.left,
                Direction::Right => node.right,
            };
        }

        match cursor {
            Branch::Channel(reached) if reached == channel => Ok(steps),
            Branch::Channel(reached) => Err(TreeError::LeafMismatch { channel, reached }),
            Branch::Node(_) => Err(TreeError::Unterminated { channel }),
            Branch::Empty => Err(TreeError::DeadEnd {
                channel,
                consumed: steps.len(),
            }),
        }
    }

    /// Recompute `in_use` markings and the active channel
    ///
    /// Walks root-to-leaf along the selected polarities, marking visited
    /// nodes and clearing all others.
    pub fn refresh_active(&mut self) {
        for node in &mut self.nodes {
            node.in_use = false;
        }

        self.active_channel = None;
        let mut cursor = Branch::Node(self.root);
        loop {
            match cursor {
                Branch::Node(id) => {
                    let Some(node) = self.node_mut(id) else {
                        warn!("active walk references unknown relay {}", id);
                        break;
                    };
                    node.in_use = true;
                    cursor = node.to_next();
                }
                Branch::Channel(channel) => {
                    self.active_channel = Some(channel);
                    break;
                }
                Branch::Empty => {
                    warn!("active walk ended without reaching a channel");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn directions(tree: &RoutingTree, channel: u8) -> Vec<(u8, Direction)> {
        tree.route_steps(channel)
            .unwrap()
            .into_iter()
            .map(|s| (s.relay.as_u8(), s.direction))
            .collect()
    }

    #[test]
    fn channel_five_path() {
        let tree = RoutingTree::cryo8();

        assert_eq!(
            directions(&tree, 5),
            vec![
                (1, Direction::Left),
                (2, Direction::Right),
                (5, Direction::Left),
            ]
        );
    }

    #[test]
    fn cryo8_all_paths_are_full_depth() {
        let tree = RoutingTree::cryo8();
        for channel in 0..8 {
            assert_eq!(tree.route_steps(channel).unwrap().len(), 3);
        }
    }

    #[test]
    fn out_of_range_channel_rejected() {
        let tree = RoutingTree::cryo8();
        assert!(matches!(
            tree.route_steps(8),
            Err(TreeError::ChannelOutOfRange { channel: 8, .. })
        ));

        let wire = RoutingTree::wire7();
        assert!(matches!(
            wire.route_steps(0),
            Err(TreeError::ChannelOutOfRange { channel: 0, .. })
        ));
    }

    #[test]
    fn wire7_line_one_terminates_early() {
        let tree = RoutingTree::wire7();

        // 7 - 1 = 6 = 110: two right turns land on the shallow leaf
        assert_eq!(
            directions(&tree, 1),
            vec![(1, Direction::Right), (3, Direction::Right)]
        );
    }

    #[test]
    fn route_steps_does_not_mutate() {
        let tree = RoutingTree::cryo8();
        let before: Vec<bool> = tree.nodes().map(|n| n.polarity).collect();

        tree.route_steps(3).unwrap();

        let after: Vec<bool> = tree.nodes().map(|n| n.polarity).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn refresh_marks_active_path_only() {
        let mut tree = RoutingTree::cryo8();
        for step in tree.route_steps(5).unwrap() {
            tree.apply_step(step);
        }
        tree.refresh_active();

        assert_eq!(tree.active_channel(), Some(5));

        let in_use: Vec<u8> = tree
            .nodes()
            .filter(|n| n.in_use)
            .map(|n| n.id.as_u8())
            .collect();
        assert_eq!(in_use, vec![1, 2, 5]);
    }

    #[test]
    fn default_polarities_route_to_channel_zero() {
        // All relays at rest point right: R1 -> R3 -> R7 -> 0
        let tree = RoutingTree::cryo8();
        assert_eq!(tree.active_channel(), Some(0));
    }

    proptest! {
        #[test]
        fn cryo8_round_trip(channel in 0u8..8) {
            let mut tree = RoutingTree::cryo8();
            for step in tree.route_steps(channel).unwrap() {
                tree.apply_step(step);
            }
            tree.refresh_active();
            prop_assert_eq!(tree.active_channel(), Some(channel));
        }

        #[test]
        fn wire7_round_trip(channel in 1u8..8) {
            let mut tree = RoutingTree::wire7();
            for step in tree.route_steps(channel).unwrap() {
                tree.apply_step(step);
            }
            tree.refresh_active();
            prop_assert_eq!(tree.active_channel(), Some(channel));
        }

        #[test]
        fn routing_is_deterministic(channel in 0u8..8) {
            let tree = RoutingTree::cryo8();
            let a = tree.route_steps(channel).unwrap();
            let b = tree.route_steps(channel).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}

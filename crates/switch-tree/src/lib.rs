//! Relay-Tree Routing Library
//!
//! This crate provides the data model and routing algorithm for a binary
//! tree of latching relays that steers a single excitation line to one of
//! N output channels.
//!
//! # Architecture
//!
//! A [`RoutingTree`] is a fixed, statically wired binary tree: each
//! [`RelayNode`] selects one of two children through its `polarity`, and
//! following the selected children from the root always terminates at a
//! numbered output channel. Routing a channel means computing the sequence
//! of polarity changes along the root-to-leaf path; the actual relay
//! actuation is left to the caller.
//!
//! Two topologies are built in:
//!
//! - [`RoutingTree::cryo8`]: the 8-channel cryogenic tree (relays R1..R7)
//! - [`RoutingTree::wire7`]: the 7-channel wire-switching tree used to
//!   route a pulse generator's output to a relay coil line
//!
//! # Example
//!
//! ```rust
//! use switch_tree::RoutingTree;
//!
//! let mut tree = RoutingTree::cryo8();
//! let steps = tree.route_steps(5).unwrap();
//!
//! for step in &steps {
//!     // ...actuate the relay here...
//!     tree.apply_step(*step);
//! }
//! tree.refresh_active();
//! assert_eq!(tree.active_channel(), Some(5));
//! ```

pub mod error;
pub mod node;
pub mod snapshot;
pub mod tree;

pub use error::TreeError;
pub use node::{Branch, RelayId, RelayNode};
pub use snapshot::{SwitchState, TreeSnapshot};
pub use tree::{Direction, RoutingTree, Step};

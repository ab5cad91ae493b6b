//! Switch Control Engine
//!
//! This crate coordinates everything needed to route the cryogenic switch
//! tree safely: it turns a channel request into relay pulses, keeps the
//! downstream amplifier powered off while contacts move, and serializes
//! concurrent requests so two actuation sequences can never interleave.
//!
//! # Architecture
//!
//! - [`PulseGen`]: how a voltage pulse is produced: a dev mock, a direct
//!   SCPI connection to the bench generator, or the shared-instrument
//!   proxy
//! - [`PulseDriver`]: how a relay flip is realized: either the relay
//!   board pulses the coil itself (`SimpleRelay`), or the board
//!   wire-switches a function generator's output onto the right coil line
//!   and the generator fires one polarized pulse (`FunctionGenerator`)
//! - [`AmpProtector`]: powers the cryo amplifier supply down before any
//!   actuation and restores its previous state afterwards, refusing to
//!   proceed unless the supply acknowledges
//! - [`SwitchManager`]: owns the routing tree and the above, exposes
//!   `route_channel` / `toggle` / `reset` / `re_assert`, and broadcasts a
//!   [`TreeSnapshot`] to subscribers after every change
//!
//! Every hardware-mutating operation requires a confirmed
//! [`relay_board::Verification`] and runs inside one lock-held bracket:
//! amplifier off, pulser unblocked, flips applied root-to-leaf, amplifier
//! restored, pulser blocked.

pub mod amp;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod generator;
pub mod manager;

pub use amp::AmpProtector;
pub use config::{
    AmplifierConfig, EngineConfig, GeneratorConfig, GeneratorKind, PulseConfig, PulseMode,
};
pub use controller::{FunctionGeneratorDriver, PulseDriver, SimpleRelayDriver};
pub use error::EngineError;
pub use events::SwitchEvent;
pub use generator::{build_generator, DevPulseGen, Polarity, PulseGen, RemotePulseGen, ScpiPulseGen};
pub use manager::{build_manager, SwitchManager};

pub use switch_tree::TreeSnapshot;

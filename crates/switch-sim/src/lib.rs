//! Switch Control Simulation Library
//!
//! This crate provides hardware stand-ins for testing the switch engine
//! without a relay board or bench instruments:
//!
//! - **VirtualRelayBoard**: implements the relay board's line protocol
//!   over any async stream and broadcasts every relay switch so tests can
//!   count physical actuations
//! - **VirtualInstruments**: a TCP server speaking the instrument-client
//!   JSON protocol for the function generator and the amplifier supply,
//!   with fault knobs for failure-path tests
//!
//! # Example
//!
//! ```rust,no_run
//! use switch_sim::{run_virtual_board_task, VirtualRelayBoard};
//! use tokio::sync::broadcast;
//!
//! # async fn demo() {
//! let (board_io, driver_io) = tokio::io::duplex(256);
//! let (event_tx, mut events) = broadcast::channel(64);
//!
//! tokio::spawn(run_virtual_board_task(
//!     board_io,
//!     VirtualRelayBoard::new(),
//!     event_tx,
//! ));
//! // hand driver_io to RelayBoard::new(..) and watch `events`
//! # }
//! ```

pub mod board;
pub mod instruments;

pub use board::{run_virtual_board_task, BoardEvent, VirtualRelayBoard};
pub use instruments::{
    serve_instruments, FiredPulse, VirtualFunctionGen, VirtualInstruments, VirtualSupply,
};

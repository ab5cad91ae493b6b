//! Relay Board Capability Layer
//!
//! This crate talks to the USB relay board that drives the switch tree. It
//! provides:
//!
//! - [`RelayBoard`]: the command driver, generic over any
//!   `AsyncRead + AsyncWrite` transport so tests can substitute an
//!   in-memory stream for the real serial port
//! - [`Verification`]: the human-confirmation token that every mutating
//!   board command requires
//! - [`scanner`]: serial port enumeration and board autodetection
//!
//! # Safety gate
//!
//! Relay coils downstream of this board sit next to cryogenic amplifiers
//! that are damaged by switching transients. Every mutating call takes a
//! [`Verification`] and refuses to emit a single byte unless it has been
//! confirmed; there is no unchecked variant.

pub mod board;
pub mod error;
pub mod scanner;
pub mod verification;

pub use board::{channel_token, RelayBoard, FIRMWARE_PREFIX};
pub use error::LinkError;
pub use scanner::{autodetect, candidate_ports};
pub use verification::{SafetyViolation, Verification};

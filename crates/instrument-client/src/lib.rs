//! Instrument Client Proxy
//!
//! Several independent processes need to drive the same physical
//! instruments (the pulse generator and the amplifier supply). Instead of
//! letting each process open its own connection, exactly one server
//! process owns the real instrument link and everyone else goes through
//! this client: a persistent TCP connection carrying one JSON object per
//! request and one per reply.
//!
//! # Wire protocol
//!
//! Request: `{"instrument": "function_gen", "method": "set_output",
//! "args": [1, 1], "kwargs": {}}` followed by a newline.
//! Reply: `{"result": ...}` or `{"error": "..."}` on a single line.
//!
//! # Failure handling
//!
//! A timeout or broken pipe marks the connection dead and surfaces a
//! typed transport error. [`InstrumentClient::call`] catches exactly that
//! class, performs ONE reconnect attempt and re-issues the request; if
//! the reconnect fails the original error propagates. Errors reported by
//! the server itself are never retried.
//!
//! The internal lock serializes requests within this process only; it is
//! not a distributed lock.

pub mod client;
pub mod error;

pub use client::{ClientConfig, InstrumentClient};
pub use error::ClientError;

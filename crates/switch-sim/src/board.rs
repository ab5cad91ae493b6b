//! Virtual relay board
//!
//! Tracks relay states based on the commands received and answers queries
//! the way the real firmware does: queried commands are echoed back and
//! every reply ends with a `>` prompt. Switch commands produce no reply,
//! matching the write-only driver side.

use std::collections::HashMap;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// One relay actuation observed by the virtual board
///
/// Tests subscribe to these to count physical switches; a pulse shows up
/// as an on followed by an off on the same relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardEvent {
    /// Relay channel that switched
    pub relay: u8,
    /// New contact state
    pub on: bool,
}

/// Virtual relay board state machine
#[derive(Debug, Clone)]
pub struct VirtualRelayBoard {
    version: String,
    states: HashMap<u8, bool>,
}

impl VirtualRelayBoard {
    /// Create a board reporting the deployed firmware id
    pub fn new() -> Self {
        Self::with_version("A0M8SSB10000000")
    }

    /// Create a board reporting a custom firmware id
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            states: HashMap::new(),
        }
    }

    /// Whether a relay contact is currently closed
    pub fn is_on(&self, relay: u8) -> bool {
        self.states.get(&relay).copied().unwrap_or(false)
    }

    /// Parse a board channel token (0..9 digits, A..V for 10..31)
    fn parse_token(token: &str) -> Option<u8> {
        if let Ok(n) = token.parse::<u8>() {
            return Some(n);
        }
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c @ 'A'..='V'), None) => Some(10 + (c as u8 - b'A')),
            _ => None,
        }
    }

    /// Process one command line
    ///
    /// Returns the bytes to send back (queries only) and the actuation
    /// event to broadcast (switch commands only).
    fn process_command(&mut self, line: &str) -> (Option<String>, Option<BoardEvent>) {
        if line == "ver" {
            return (Some(format!("ver\n\r{}\n\r>", self.version)), None);
        }
        if line == "reset" {
            self.states.clear();
            return (None, None);
        }

        let mut parts = line.split_whitespace();
        if parts.next() != Some("relay") {
            warn!("virtual board ignoring {:?}", line);
            return (None, None);
        }
        let action = parts.next();
        let token = parts.next().and_then(Self::parse_token);

        match (action, token) {
            (Some("on"), Some(relay)) => {
                self.states.insert(relay, true);
                debug!("virtual relay {} on", relay);
                (None, Some(BoardEvent { relay, on: true }))
            }
            (Some("off"), Some(relay)) => {
                self.states.insert(relay, false);
                debug!("virtual relay {} off", relay);
                (None, Some(BoardEvent { relay, on: false }))
            }
            (Some("read"), Some(relay)) => {
                let state = if self.is_on(relay) { "on" } else { "off" };
                (Some(format!("{}\n\r{}\n\r>", line, state)), None)
            }
            _ => {
                warn!("virtual board ignoring {:?}", line);
                (None, None)
            }
        }
    }
}

impl Default for VirtualRelayBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the virtual board against an async stream
///
/// Reads command lines from the stream, applies them to the board, writes
/// query replies back and broadcasts a [`BoardEvent`] per switch. Returns
/// when the stream closes.
pub async fn run_virtual_board_task<S>(
    mut stream: S,
    mut board: VirtualRelayBoard,
    event_tx: broadcast::Sender<BoardEvent>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!("virtual relay board starting, firmware {}", board.version);

    let mut buf = [0u8; 256];
    let mut pending = String::new();

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        pending.push_str(&String::from_utf8_lossy(&buf[..n]));

        while let Some(pos) = pending.find(['\n', '\r']) {
            let line = pending[..pos].trim().to_string();
            pending.drain(..=pos);
            if line.is_empty() {
                continue;
            }

            let (reply, event) = board.process_command(&line);
            if let Some(event) = event {
                let _ = event_tx.send(event);
            }
            if let Some(reply) = reply {
                stream.write_all(reply.as_bytes()).await?;
                stream.flush().await?;
            }
        }
    }

    info!("virtual relay board stream closed");
    Ok(())
}

//! Serial port scanning and board autodetection

use serialport::{available_ports, SerialPortType};
use tokio_serial::SerialStream;
use tracing::{info, warn};

use crate::board::RelayBoard;
use crate::error::LinkError;
use crate::verification::Verification;

/// Ports that are never relay boards
const SKIP_PATTERNS: &[&str] = &["Bluetooth", "debug"];

/// Enumerate serial ports that could plausibly host the relay board
///
/// USB ports are listed first since the board always enumerates as USB;
/// built-in ports follow as a fallback.
pub fn candidate_ports() -> Result<Vec<String>, LinkError> {
    let ports =
        available_ports().map_err(|e| LinkError::EnumerationFailed(e.to_string()))?;

    let mut usb = Vec::new();
    let mut other = Vec::new();
    for port in ports {
        if SKIP_PATTERNS.iter().any(|p| port.port_name.contains(p)) {
            continue;
        }
        match port.port_type {
            SerialPortType::UsbPort(_) => usb.push(port.port_name),
            _ => other.push(port.port_name),
        }
    }

    usb.extend(other);
    if usb.is_empty() {
        info!("no serial ports found");
    } else {
        info!("found {} candidate serial port(s)", usb.len());
    }
    Ok(usb)
}

/// Find and initialize the relay board
///
/// Opens each candidate port in turn and keeps the first one whose
/// firmware handshake matches `prefix` (use [`crate::board::FIRMWARE_PREFIX`]
/// for the deployed boards). The board is brought to a known baseline by
/// opening relays 0..8 before it is handed out.
pub async fn autodetect(prefix: &str) -> Result<RelayBoard<SerialStream>, LinkError> {
    let verification = Verification::confirmed(0);

    for port in candidate_ports()? {
        let mut board = match RelayBoard::open(&port) {
            Ok(board) => board,
            Err(e) => {
                warn!("skipping {}: {}", port, e);
                continue;
            }
        };

        match board.handshake(prefix).await {
            Ok(_) => {
                for relay in 0..8 {
                    board.turn_off(relay, &verification).await?;
                }
                info!("relay board initialized on {}", port);
                return Ok(board);
            }
            Err(e) => warn!("no board on {}: {}", port, e),
        }
    }

    Err(LinkError::NoBoardFound)
}

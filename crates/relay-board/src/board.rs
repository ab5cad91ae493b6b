//! Relay board command driver
//!
//! Speaks the board's line protocol (`relay on 3`, `relay off A`, `ver`,
//! ...) over any async byte stream. Real deployments use a serial port;
//! tests use `tokio::io::duplex` with a virtual board on the other end.
//!
//! The board echoes queried commands back before answering and terminates
//! every reply with a `>` prompt; [`RelayBoard::query`] strips both.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::error::LinkError;
use crate::verification::Verification;

/// Baud rate of the relay board's USB serial interface
const BAUD_RATE: u32 = 9600;

/// How long to wait for a query reply before declaring the board dead
const REPLY_TIMEOUT: Duration = Duration::from_millis(250);

/// Firmware id prefix reported by the deployed boards
pub const FIRMWARE_PREFIX: &str = "A0M";

/// Board token for a relay channel: 0..9 as digits, 10..31 as A..V
pub fn channel_token(channel: u8) -> String {
    match channel {
        0..=9 => channel.to_string(),
        10..=31 => char::from(b'A' + (channel - 10)).to_string(),
        _ => channel.to_string(),
    }
}

/// Driver for the USB relay board
///
/// Generic over the transport so the same driver runs against a serial
/// port or an in-memory stream. Mutating commands are gated on a
/// [`Verification`]; nothing is written to the transport when the check
/// fails.
pub struct RelayBoard<T> {
    io: T,
    reply_timeout: Duration,
}

impl RelayBoard<SerialStream> {
    /// Open the board on a serial port
    pub fn open(port: &str) -> Result<Self, LinkError> {
        let stream = tokio_serial::new(port, BAUD_RATE)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| LinkError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self::new(stream))
    }
}

impl<T> RelayBoard<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open transport
    pub fn new(io: T) -> Self {
        Self {
            io,
            reply_timeout: REPLY_TIMEOUT,
        }
    }

    async fn write_command(&mut self, command: &str) -> Result<(), LinkError> {
        self.io.write_all(command.as_bytes()).await?;
        self.io.write_all(b"\n\r").await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Issue a query and return the cleaned reply
    ///
    /// Reads until the `>` prompt arrives, then strips the echoed command,
    /// line terminators and the prompt itself.
    pub async fn query(&mut self, command: &str) -> Result<String, LinkError> {
        self.write_command(command).await?;

        let deadline = Instant::now() + self.reply_timeout;
        let mut raw = Vec::new();
        let mut buf = [0u8; 256];

        while !raw.contains(&b'>') {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::ReplyTimeout {
                    command: command.to_string(),
                });
            }

            match timeout(remaining, self.io.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
                }
                Ok(Ok(n)) => raw.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(LinkError::ReplyTimeout {
                        command: command.to_string(),
                    })
                }
            }
        }

        let text = String::from_utf8_lossy(&raw)
            .replace(command, "")
            .replace(['\n', '\r'], "");
        Ok(text.trim_end_matches('>').to_string())
    }

    /// Firmware identification string
    pub async fn firmware_version(&mut self) -> Result<String, LinkError> {
        self.query("ver").await
    }

    /// Verify the board answers with the expected firmware prefix
    pub async fn handshake(&mut self, prefix: &str) -> Result<String, LinkError> {
        let version = self.firmware_version().await?;
        if !version.starts_with(prefix) {
            return Err(LinkError::Handshake {
                version,
                prefix: prefix.to_string(),
            });
        }
        info!("relay board connected, firmware {}", version);
        Ok(version)
    }

    /// Close a relay channel
    pub async fn turn_on(
        &mut self,
        channel: u8,
        verification: &Verification,
    ) -> Result<(), LinkError> {
        verification.check()?;
        debug!("relay {} on", channel);
        self.write_command(&format!("relay on {}", channel_token(channel)))
            .await
    }

    /// Open a relay channel
    pub async fn turn_off(
        &mut self,
        channel: u8,
        verification: &Verification,
    ) -> Result<(), LinkError> {
        verification.check()?;
        debug!("relay {} off", channel);
        self.write_command(&format!("relay off {}", channel_token(channel)))
            .await
    }

    /// Close a channel for `width_ms`, then reopen it
    pub async fn send_pulse(
        &mut self,
        channel: u8,
        width_ms: u64,
        verification: &Verification,
    ) -> Result<(), LinkError> {
        verification.check()?;
        self.turn_on(channel, verification).await?;
        sleep(Duration::from_millis(width_ms)).await;
        self.turn_off(channel, verification).await
    }

    /// Read back whether a channel is currently closed
    pub async fn read_state(&mut self, channel: u8) -> Result<bool, LinkError> {
        let command = format!("relay read {}", channel_token(channel));
        let reply = self.query(&command).await?;

        if reply.contains("on") {
            Ok(true)
        } else if reply.contains("off") {
            Ok(false)
        } else {
            Err(LinkError::UnexpectedReply { command, reply })
        }
    }

    /// Firmware-level reset of the board
    pub async fn reset(&mut self) -> Result<(), LinkError> {
        self.write_command("reset").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn channel_tokens() {
        assert_eq!(channel_token(0), "0");
        assert_eq!(channel_token(9), "9");
        assert_eq!(channel_token(10), "A");
        assert_eq!(channel_token(15), "F");
        assert_eq!(channel_token(31), "V");
    }

    #[tokio::test]
    async fn turn_on_writes_command() {
        let (io, mut peer) = duplex(256);
        let mut board = RelayBoard::new(io);

        board
            .turn_on(3, &Verification::confirmed(1))
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"relay on 3\n\r");
    }

    #[tokio::test]
    async fn unverified_command_writes_nothing() {
        let (io, mut peer) = duplex(256);
        let mut board = RelayBoard::new(io);

        let unverified = Verification {
            verified: false,
            timestamp: 0,
            user_confirmed: false,
        };
        assert!(matches!(
            board.turn_on(3, &unverified).await,
            Err(LinkError::Safety(_))
        ));

        // The next thing the peer sees must be the verified command, not
        // leftovers from the rejected one.
        board
            .turn_off(4, &Verification::confirmed(1))
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"relay off 4\n\r");
    }

    #[tokio::test]
    async fn query_strips_echo_and_prompt() {
        let (io, mut peer) = duplex(256);
        let mut board = RelayBoard::new(io);

        let reply = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = peer.read(&mut buf).await.unwrap();
            peer.write_all(b"ver\n\rA0M8SSB10000000\n\r>").await.unwrap();
            peer
        });

        let version = board.firmware_version().await.unwrap();
        assert_eq!(version, "A0M8SSB10000000");
        reply.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_rejects_unknown_firmware() {
        let (io, mut peer) = duplex(256);
        let mut board = RelayBoard::new(io);

        let reply = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = peer.read(&mut buf).await.unwrap();
            peer.write_all(b"ver\n\rGPS_MOUSE\n\r>").await.unwrap();
            peer
        });

        assert!(matches!(
            board.handshake(FIRMWARE_PREFIX).await,
            Err(LinkError::Handshake { .. })
        ));
        reply.await.unwrap();
    }

    #[tokio::test]
    async fn query_times_out_on_silent_board() {
        let (io, _peer) = duplex(256);
        let mut board = RelayBoard::new(io);
        board.reply_timeout = Duration::from_millis(20);

        assert!(matches!(
            board.firmware_version().await,
            Err(LinkError::ReplyTimeout { .. })
        ));
    }
}

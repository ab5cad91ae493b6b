//! Pulse generator implementations
//!
//! [`PulseGen`] wraps the three interchangeable ways of producing a relay
//! coil pulse. Callers cannot tell them apart: the same connect/arm/fire
//! contract holds whether the calls hit a mock, a direct SCPI socket, or
//! the shared-instrument proxy.

use std::fmt;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use instrument_client::{ClientConfig, InstrumentClient};

use crate::config::{GeneratorConfig, GeneratorKind};
use crate::error::EngineError;

/// Polarity of a fired pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Positive pulse (flips a relay left)
    Pos,
    /// Negative pulse (flips a relay right)
    Neg,
}

impl Polarity {
    /// Wire spelling used by the instrument server and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Polarity::Pos => "POS",
            Polarity::Neg => "NEG",
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pulse generator implementation
///
/// Enum dispatch keeps the async methods object-free; the variant is
/// selected by configuration through [`build_generator`].
pub enum PulseGen {
    /// Log-only mock
    Dev(DevPulseGen),
    /// Direct SCPI connection
    Direct(ScpiPulseGen),
    /// Shared instrument behind the proxy server
    Remote(RemotePulseGen),
}

impl PulseGen {
    /// Establish the connection
    pub async fn connect(&mut self) -> Result<(), EngineError> {
        match self {
            PulseGen::Dev(g) => g.connect(),
            PulseGen::Direct(g) => g.connect().await,
            PulseGen::Remote(g) => g.connect().await,
        }
    }

    /// Tear the connection down
    pub async fn disconnect(&mut self) -> Result<(), EngineError> {
        match self {
            PulseGen::Dev(g) => g.disconnect(),
            PulseGen::Direct(g) => g.disconnect(),
            PulseGen::Remote(g) => g.disconnect().await,
        }
    }

    /// Configure the pulse width in seconds
    pub async fn setup_pulse(&mut self, width: f64) -> Result<(), EngineError> {
        match self {
            PulseGen::Dev(g) => g.record(format!("setup_pulse({width})")),
            PulseGen::Direct(g) => g.setup_pulse(width).await,
            PulseGen::Remote(g) => g.setup_pulse(width).await,
        }
    }

    /// Configure the trigger source for a channel
    pub async fn setup_trigger(&mut self, channel: u8, source: &str) -> Result<(), EngineError> {
        match self {
            PulseGen::Dev(g) => g.record(format!("setup_trigger({channel}, {source})")),
            PulseGen::Direct(g) => g.setup_trigger(channel, source).await,
            PulseGen::Remote(g) => g.setup_trigger(channel, source).await,
        }
    }

    /// Enable or disable a channel output
    pub async fn set_output(&mut self, channel: u8, enabled: bool) -> Result<(), EngineError> {
        match self {
            PulseGen::Dev(g) => g.record(format!("set_output({channel}, {enabled})")),
            PulseGen::Direct(g) => g.set_output(channel, enabled).await,
            PulseGen::Remote(g) => g.set_output(channel, enabled).await,
        }
    }

    /// Fire exactly one polarized pulse
    pub async fn trigger_with_polarity(
        &mut self,
        channel: u8,
        amplitude: f64,
        polarity: Polarity,
    ) -> Result<(), EngineError> {
        debug!("triggering {} pulse at {} V", polarity, amplitude);
        match self {
            PulseGen::Dev(g) => g.fire(channel, amplitude, polarity),
            PulseGen::Direct(g) => g.trigger_with_polarity(channel, amplitude, polarity).await,
            PulseGen::Remote(g) => g.trigger_with_polarity(channel, amplitude, polarity).await,
        }
    }

    /// Access the dev mock for test inspection
    pub fn as_dev(&self) -> Option<&DevPulseGen> {
        match self {
            PulseGen::Dev(g) => Some(g),
            _ => None,
        }
    }
}

/// Instantiate a generator from configuration
pub fn build_generator(config: &GeneratorConfig) -> PulseGen {
    match config.kind {
        GeneratorKind::Dev => PulseGen::Dev(DevPulseGen::default()),
        GeneratorKind::Direct => PulseGen::Direct(ScpiPulseGen::new(&config.scpi_addr)),
        GeneratorKind::Remote => PulseGen::Remote(RemotePulseGen::new(config.proxy.clone())),
    }
}

/// No-op generator that logs calls instead of talking to hardware
#[derive(Debug, Default)]
pub struct DevPulseGen {
    connected: bool,
    /// Setup calls, in order (for test inspection)
    pub calls: Vec<String>,
    /// Fired pulses, in order
    pub fired: Vec<(u8, f64, Polarity)>,
}

impl DevPulseGen {
    fn connect(&mut self) -> Result<(), EngineError> {
        self.connected = true;
        info!("[dev pulse generator] connect");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), EngineError> {
        self.connected = false;
        info!("[dev pulse generator] disconnect");
        Ok(())
    }

    fn record(&mut self, call: String) -> Result<(), EngineError> {
        info!("[dev pulse generator] {}", call);
        self.calls.push(call);
        Ok(())
    }

    fn fire(&mut self, channel: u8, amplitude: f64, polarity: Polarity) -> Result<(), EngineError> {
        info!(
            "[dev pulse generator] pulse channel {} at {} V {}",
            channel, amplitude, polarity
        );
        self.fired.push((channel, amplitude, polarity));
        Ok(())
    }

    /// Whether connect() has been called without a later disconnect()
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Direct SCPI connection to the bench generator
///
/// Speaks newline-terminated SCPI over the instrument's raw socket port.
/// Only `*IDN?` reads a reply; everything else is write-only with `*OPC`
/// sequencing, the way the deployed scripts drive it.
pub struct ScpiPulseGen {
    addr: String,
    conn: Option<BufReader<TcpStream>>,
}

impl ScpiPulseGen {
    /// Create a generator for an address like "10.9.0.50:5025"
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: None,
        }
    }

    async fn connect(&mut self) -> Result<(), EngineError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.addr).await?;
        self.conn = Some(BufReader::new(stream));

        let idn = self.query("*IDN?").await?;
        info!("connected to pulse generator: {}", idn.trim());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), EngineError> {
        self.conn = None;
        Ok(())
    }

    async fn write_line(&mut self, command: &str) -> Result<(), EngineError> {
        let conn = self.conn.as_mut().ok_or(EngineError::GeneratorOffline)?;
        let stream = conn.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, EngineError> {
        self.write_line(command).await?;
        let conn = self.conn.as_mut().ok_or(EngineError::GeneratorOffline)?;
        let mut line = String::new();
        conn.read_line(&mut line).await?;
        Ok(line)
    }

    async fn setup_pulse(&mut self, width: f64) -> Result<(), EngineError> {
        self.write_line(":SOURce1:FUNCtion PULSe").await?;
        self.write_line(":SOURce1:FUNCtion:PULSe:PERiod 0.5").await?;
        self.write_line(&format!(":SOURce1:FUNCtion:PULSe:WIDTh {width}"))
            .await?;
        self.write_line(":SOURce1:FUNCtion:PULSe:TRANsition:BOTH 10000 ns")
            .await?;
        self.write_line("*OPC").await
    }

    async fn setup_trigger(&mut self, channel: u8, source: &str) -> Result<(), EngineError> {
        self.write_line(&format!(":TRIGger{channel}:SOURce {source}"))
            .await?;
        self.write_line("*OPC").await
    }

    async fn set_output(&mut self, channel: u8, enabled: bool) -> Result<(), EngineError> {
        self.write_line(&format!(":OUTPut{channel} {}", u8::from(enabled)))
            .await?;
        self.write_line("*OPC").await
    }

    async fn trigger_with_polarity(
        &mut self,
        channel: u8,
        amplitude: f64,
        polarity: Polarity,
    ) -> Result<(), EngineError> {
        // The pulse rides on a DC offset of half its amplitude so the
        // waveform swings from zero, mirrored for negative polarity.
        let (offset, scpi_polarity) = match polarity {
            Polarity::Pos => (amplitude / 2.0, "NORMal"),
            Polarity::Neg => (-amplitude / 2.0, "INVerted"),
        };

        self.write_line(&format!(":SOURce{channel}:VOLTage {amplitude}"))
            .await?;
        self.write_line(&format!(":SOURce{channel}:VOLTage:OFFSet {offset}"))
            .await?;
        self.write_line(&format!(":OUTPut{channel}:POLarity {scpi_polarity}"))
            .await?;
        self.write_line("*OPC").await?;
        self.write_line(&format!(":TRIGger{channel}")).await?;
        self.write_line("*OPC").await
    }
}

/// Proxy-backed generator sharing one instrument across processes
pub struct RemotePulseGen {
    client: InstrumentClient,
}

impl RemotePulseGen {
    /// Create a generator talking to the shared instrument server
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: InstrumentClient::new(config),
        }
    }

    async fn connect(&mut self) -> Result<(), EngineError> {
        self.client.connect().await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), EngineError> {
        self.client.disconnect().await;
        Ok(())
    }

    async fn setup_pulse(&mut self, width: f64) -> Result<(), EngineError> {
        let mut kwargs = Map::new();
        kwargs.insert("width".to_string(), json!(width));
        self.client
            .call_with_kwargs("setup_pulse", vec![], kwargs)
            .await?;
        Ok(())
    }

    async fn setup_trigger(&mut self, channel: u8, source: &str) -> Result<(), EngineError> {
        self.client
            .call("setup_trigger", vec![json!(channel), json!(source)])
            .await?;
        Ok(())
    }

    async fn set_output(&mut self, channel: u8, enabled: bool) -> Result<(), EngineError> {
        self.client
            .call("set_output", vec![json!(channel), json!(u8::from(enabled))])
            .await?;
        Ok(())
    }

    async fn trigger_with_polarity(
        &mut self,
        channel: u8,
        amplitude: f64,
        polarity: Polarity,
    ) -> Result<(), EngineError> {
        self.client
            .call(
                "trigger_with_polarity",
                vec![json!(channel), json!(amplitude), json!(polarity.as_str())],
            )
            .await?;
        Ok(())
    }
}

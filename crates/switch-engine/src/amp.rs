//! Amplifier protection guard
//!
//! The cryogenic amplifiers downstream of the tree must never see a
//! switching transient. Before any relay moves, the guard powers their
//! supply channel down and verifies the supply actually confirmed the
//! off-state; afterwards it restores whatever state the supply was in
//! before. An unconfirmed state is fatal to the operation; continuing
//! to pulse with the amplifier possibly live risks the hardware.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info};

use instrument_client::InstrumentClient;

use crate::config::AmplifierConfig;
use crate::error::EngineError;

/// Residual voltage still considered "off" (V)
const OFF_VOLTAGE_MAX: f64 = 0.005;

/// Guard controlling the amplifier supply channel
///
/// `disabled` guards (dev setups without a supply) accept every operation
/// as a no-op. Live guards talk to the supply through the shared
/// instrument server.
pub struct AmpProtector {
    link: Option<InstrumentClient>,
    channel: u8,
    settle_off: Duration,
    settle_on: Duration,
    was_on: bool,
}

impl AmpProtector {
    /// A guard that does nothing (no supply attached)
    pub fn disabled() -> Self {
        Self {
            link: None,
            channel: 0,
            settle_off: Duration::ZERO,
            settle_on: Duration::ZERO,
            was_on: false,
        }
    }

    /// Build a guard from configuration
    pub fn from_config(config: &AmplifierConfig) -> Self {
        if config.disabled {
            return Self::disabled();
        }
        Self {
            link: Some(InstrumentClient::new(config.proxy.clone())),
            channel: config.channel,
            settle_off: Duration::from_millis(config.settle_off_ms),
            settle_on: Duration::from_millis(config.settle_on_ms),
            was_on: false,
        }
    }

    /// Connect to the supply (no-op when disabled)
    pub async fn connect(&self) -> Result<(), EngineError> {
        if let Some(client) = &self.link {
            client.connect().await?;
        }
        Ok(())
    }

    /// Whether the supply output is currently on
    pub async fn is_on(&self) -> Result<bool, EngineError> {
        match &self.link {
            Some(client) => supply_is_on(client, self.channel).await,
            None => Ok(false),
        }
    }

    /// Power the amplifier down and verify it is really off
    ///
    /// Remembers the prior state so [`AmpProtector::restore`] can bring
    /// it back after the actuation sequence.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        let Some(client) = &self.link else {
            return Ok(());
        };

        self.was_on = supply_is_on(client, self.channel).await?;
        supply_call(client, self.channel, "output_off").await?;
        sleep(self.settle_off).await;

        if supply_is_on(client, self.channel).await? {
            return Err(EngineError::HardwareAck(
                "amplifier supply did not confirm off".to_string(),
            ));
        }
        let volts = supply_call(client, self.channel, "getVoltage")
            .await?
            .as_f64()
            .unwrap_or(f64::MAX);
        if volts > OFF_VOLTAGE_MAX {
            return Err(EngineError::HardwareAck(format!(
                "amplifier supply still reads {volts} V"
            )));
        }

        debug!("amplifier supply confirmed off (was_on={})", self.was_on);
        Ok(())
    }

    /// Restore the supply to its pre-shutdown state
    pub async fn restore(&mut self) -> Result<(), EngineError> {
        let Some(client) = &self.link else {
            return Ok(());
        };
        if !self.was_on {
            return Ok(());
        }

        supply_call(client, self.channel, "output_on").await?;
        sleep(self.settle_on).await;

        if !supply_is_on(client, self.channel).await? {
            return Err(EngineError::HardwareAck(
                "amplifier supply did not confirm on".to_string(),
            ));
        }
        info!("amplifier supply restored to on");
        Ok(())
    }
}

async fn supply_call(
    client: &InstrumentClient,
    channel: u8,
    method: &str,
) -> Result<Value, EngineError> {
    Ok(client.call(method, vec![json!(channel)]).await?)
}

async fn supply_is_on(client: &InstrumentClient, channel: u8) -> Result<bool, EngineError> {
    let state = supply_call(client, channel, "get_on_off").await?;
    Ok(state.as_str() == Some("1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use instrument_client::ClientConfig;
    use std::sync::Arc;
    use switch_sim::{serve_instruments, VirtualInstruments};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    async fn guard_with_bench() -> (AmpProtector, Arc<Mutex<VirtualInstruments>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let bench = Arc::new(Mutex::new(VirtualInstruments::default()));
        tokio::spawn(serve_instruments(listener, bench.clone()));

        let config = AmplifierConfig {
            settle_off_ms: 1,
            settle_on_ms: 1,
            proxy: ClientConfig {
                host: "127.0.0.1".to_string(),
                port,
                instrument: "power_supply".to_string(),
                timeout_ms: 1_000,
            },
            ..Default::default()
        };
        let guard = AmpProtector::from_config(&config);
        guard.connect().await.unwrap();
        (guard, bench)
    }

    #[tokio::test]
    async fn shutdown_then_restore_preserves_on_state() {
        let (mut guard, bench) = guard_with_bench().await;
        bench.lock().await.power_supply.set_output(3, true);

        guard.shutdown().await.unwrap();
        assert!(!bench.lock().await.power_supply.is_on(3));

        guard.restore().await.unwrap();
        assert!(bench.lock().await.power_supply.is_on(3));
    }

    #[tokio::test]
    async fn restore_leaves_off_supply_off() {
        let (mut guard, bench) = guard_with_bench().await;

        guard.shutdown().await.unwrap();
        guard.restore().await.unwrap();
        assert!(!bench.lock().await.power_supply.is_on(3));
    }

    #[tokio::test]
    async fn unconfirmed_off_is_fatal() {
        let (mut guard, bench) = guard_with_bench().await;
        {
            let mut bench = bench.lock().await;
            bench.power_supply.set_output(3, true);
            bench.power_supply.fail_off = true;
        }

        let err = guard.shutdown().await.unwrap_err();
        assert!(matches!(err, EngineError::HardwareAck(_)));
    }

    #[tokio::test]
    async fn disabled_guard_is_a_no_op() {
        let mut guard = AmpProtector::disabled();
        guard.shutdown().await.unwrap();
        guard.restore().await.unwrap();
        assert!(!guard.is_on().await.unwrap());
    }
}

//! Virtual instrument server
//!
//! Emulates the TCP server that owns the shared bench instruments,
//! speaking the instrument-client JSON protocol: one request object per
//! line, one `{"result"}` or `{"error"}` object back. Two instruments are
//! served, matching the deployed setup:
//!
//! - `function_gen`: records arming state and every fired pulse
//! - `power_supply`: per-channel output state and measured voltage, with
//!   a `fail_off` knob that makes the output refuse to turn off (for
//!   protection-path tests)

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One pulse fired by the virtual function generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredPulse {
    /// Generator channel
    pub channel: u8,
    /// Amplitude in volts
    pub amplitude: f64,
    /// "POS" or "NEG"
    pub polarity: String,
}

/// Virtual function generator state
#[derive(Debug, Default)]
pub struct VirtualFunctionGen {
    /// Last configured pulse width in seconds
    pub pulse_width: Option<f64>,
    /// Last configured trigger (channel, source)
    pub trigger: Option<(u8, String)>,
    /// Output enable per channel
    pub outputs: HashMap<u8, bool>,
    /// Every pulse fired, in order
    pub fired: Vec<FiredPulse>,
}

/// Virtual amplifier power supply state
#[derive(Debug)]
pub struct VirtualSupply {
    outputs: HashMap<u8, bool>,
    /// Voltage reported while an output is on
    pub on_voltage: f64,
    /// Fault knob: when set, `output_off` is accepted but ignored
    pub fail_off: bool,
}

impl Default for VirtualSupply {
    fn default() -> Self {
        Self {
            outputs: HashMap::new(),
            on_voltage: 3.3,
            fail_off: false,
        }
    }
}

impl VirtualSupply {
    /// Force a channel state (test setup)
    pub fn set_output(&mut self, channel: u8, on: bool) {
        self.outputs.insert(channel, on);
    }

    /// Whether a channel output is on
    pub fn is_on(&self, channel: u8) -> bool {
        self.outputs.get(&channel).copied().unwrap_or(false)
    }
}

/// The full virtual bench behind one server
#[derive(Debug, Default)]
pub struct VirtualInstruments {
    pub function_gen: VirtualFunctionGen,
    pub power_supply: VirtualSupply,
}

impl VirtualInstruments {
    /// Execute one request and produce the reply object
    pub fn handle(&mut self, request: &Value) -> Value {
        let instrument = request["instrument"].as_str().unwrap_or_default();
        let method = request["method"].as_str().unwrap_or_default();
        let args = request["args"].as_array().cloned().unwrap_or_default();
        let kwargs = request["kwargs"].clone();

        debug!("virtual {} <- {}({:?})", instrument, method, args);

        let result = match instrument {
            "function_gen" => self.handle_function_gen(method, &args, &kwargs),
            "power_supply" => self.handle_power_supply(method, &args),
            other => Err(format!("unknown instrument: {other}")),
        };

        match result {
            Ok(value) => json!({ "result": value }),
            Err(message) => {
                warn!("virtual instrument error: {}", message);
                json!({ "error": message })
            }
        }
    }

    fn handle_function_gen(
        &mut self,
        method: &str,
        args: &[Value],
        kwargs: &Value,
    ) -> Result<Value, String> {
        let gen = &mut self.function_gen;
        match method {
            "setup_pulse" => {
                let width = kwargs["width"]
                    .as_f64()
                    .or_else(|| args.first().and_then(Value::as_f64))
                    .ok_or("setup_pulse requires a width")?;
                gen.pulse_width = Some(width);
                Ok(Value::Null)
            }
            "setup_trigger" => {
                let channel = args.first().and_then(Value::as_u64).unwrap_or(1) as u8;
                let source = args
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or("BUS")
                    .to_string();
                gen.trigger = Some((channel, source));
                Ok(Value::Null)
            }
            "set_output" => {
                let channel = args.first().and_then(Value::as_u64).unwrap_or(1) as u8;
                let enabled = args
                    .get(1)
                    .map(|v| v.as_u64().unwrap_or(0) != 0 || v.as_bool().unwrap_or(false))
                    .unwrap_or(false);
                gen.outputs.insert(channel, enabled);
                Ok(Value::Null)
            }
            "trigger_with_polarity" => {
                let channel = args.first().and_then(Value::as_u64).unwrap_or(1) as u8;
                let amplitude = args.get(1).and_then(Value::as_f64).unwrap_or(0.0);
                let polarity = args
                    .get(2)
                    .and_then(Value::as_str)
                    .ok_or("trigger_with_polarity requires a polarity")?;
                if polarity != "POS" && polarity != "NEG" {
                    return Err(format!("polarity must be POS or NEG, got {polarity}"));
                }
                gen.fired.push(FiredPulse {
                    channel,
                    amplitude,
                    polarity: polarity.to_string(),
                });
                Ok(Value::Null)
            }
            other => Err(format!("unknown function_gen method: {other}")),
        }
    }

    fn handle_power_supply(&mut self, method: &str, args: &[Value]) -> Result<Value, String> {
        let supply = &mut self.power_supply;
        let channel = args.first().and_then(Value::as_u64).unwrap_or(1) as u8;
        match method {
            "output_on" => {
                supply.outputs.insert(channel, true);
                Ok(Value::Null)
            }
            "output_off" => {
                if !supply.fail_off {
                    supply.outputs.insert(channel, false);
                }
                Ok(Value::Null)
            }
            "get_on_off" => Ok(Value::from(if supply.is_on(channel) { "1" } else { "0" })),
            "getVoltage" => {
                let volts = if supply.is_on(channel) {
                    supply.on_voltage
                } else {
                    0.0
                };
                Ok(Value::from(volts))
            }
            other => Err(format!("unknown power_supply method: {other}")),
        }
    }
}

/// Serve the virtual instruments on a TCP listener
///
/// Each connection gets the line-delimited JSON request/reply loop; all
/// connections share the same instrument state, like the real server
/// sharing one VISA session.
pub async fn serve_instruments(listener: TcpListener, state: Arc<Mutex<VirtualInstruments>>) {
    info!(
        "virtual instrument server listening on {:?}",
        listener.local_addr()
    );

    loop {
        let Ok((stream, peer)) = listener.accept().await else {
            return;
        };
        debug!("instrument client connected from {}", peer);

        let state = state.clone();
        tokio::spawn(async move {
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let reply = match serde_json::from_str::<Value>(&line) {
                    Ok(request) => state.lock().await.handle(&request),
                    Err(e) => json!({ "error": format!("malformed request: {e}") }),
                };
                if write
                    .write_all(format!("{reply}\n").as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("instrument client {} disconnected", peer);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_and_records_pulses() {
        let mut bench = VirtualInstruments::default();

        let reply = bench.handle(&json!({
            "instrument": "function_gen",
            "method": "trigger_with_polarity",
            "args": [1, 2.5, "POS"],
            "kwargs": {}
        }));
        assert_eq!(reply["result"], Value::Null);
        assert_eq!(
            bench.function_gen.fired,
            vec![FiredPulse {
                channel: 1,
                amplitude: 2.5,
                polarity: "POS".to_string()
            }]
        );
    }

    #[test]
    fn rejects_bad_polarity() {
        let mut bench = VirtualInstruments::default();
        let reply = bench.handle(&json!({
            "instrument": "function_gen",
            "method": "trigger_with_polarity",
            "args": [1, 2.5, "UP"],
            "kwargs": {}
        }));
        assert!(reply["error"].as_str().unwrap().contains("polarity"));
    }

    #[test]
    fn supply_confirms_off_unless_faulted() {
        let mut bench = VirtualInstruments::default();
        bench.power_supply.set_output(3, true);

        bench.handle(&json!({
            "instrument": "power_supply", "method": "output_off",
            "args": [3], "kwargs": {}
        }));
        let reply = bench.handle(&json!({
            "instrument": "power_supply", "method": "get_on_off",
            "args": [3], "kwargs": {}
        }));
        assert_eq!(reply["result"], "0");

        bench.power_supply.set_output(3, true);
        bench.power_supply.fail_off = true;
        bench.handle(&json!({
            "instrument": "power_supply", "method": "output_off",
            "args": [3], "kwargs": {}
        }));
        let reply = bench.handle(&json!({
            "instrument": "power_supply", "method": "get_on_off",
            "args": [3], "kwargs": {}
        }));
        assert_eq!(reply["result"], "1");
    }

    #[test]
    fn setup_pulse_accepts_kwarg_width() {
        let mut bench = VirtualInstruments::default();
        bench.handle(&json!({
            "instrument": "function_gen", "method": "setup_pulse",
            "args": [], "kwargs": {"width": 0.05}
        }));
        assert_eq!(bench.function_gen.pulse_width, Some(0.05));
    }
}

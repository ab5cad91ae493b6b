//! Engine configuration

use instrument_client::ClientConfig;
use serde::{Deserialize, Serialize};

/// Pulse timing and amplitude settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Relay settle time between actuation steps (ms)
    pub sleep_ms: u64,
    /// Coil pulse duration (ms)
    pub pulse_ms: u64,
    /// Pulse amplitude with the tree at cryogenic temperature (V)
    pub cryo_amplitude: f64,
    /// Pulse amplitude with the tree at room temperature (V)
    pub room_temp_amplitude: f64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            sleep_ms: 50,
            pulse_ms: 50,
            cryo_amplitude: 2.5,
            room_temp_amplitude: 5.0,
        }
    }
}

/// How relay flips are physically produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PulseMode {
    /// The relay board pulses each coil directly
    SimpleRelay,
    /// A function generator fires pulses through a wire-switching sub-tree
    #[default]
    FunctionGenerator,
}

/// Which pulse generator implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeneratorKind {
    /// Log-only mock for development without hardware
    #[default]
    Dev,
    /// Direct SCPI connection to the bench generator
    Direct,
    /// Shared instrument behind the proxy server
    Remote,
}

/// Pulse generator selection and connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Implementation to instantiate
    pub kind: GeneratorKind,
    /// SCPI socket address for [`GeneratorKind::Direct`]
    pub scpi_addr: String,
    /// Proxy settings for [`GeneratorKind::Remote`]
    pub proxy: ClientConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Dev,
            scpi_addr: "10.9.0.50:5025".to_string(),
            proxy: ClientConfig::new("function_gen"),
        }
    }
}

/// Amplifier protection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplifierConfig {
    /// Skip amplifier protection entirely (dev setups only)
    pub disabled: bool,
    /// Supply channel powering the cryo amplifier
    pub channel: u8,
    /// Settle time after commanding the output off (ms)
    pub settle_off_ms: u64,
    /// Settle time after commanding the output on (ms)
    pub settle_on_ms: u64,
    /// Proxy settings for the supply behind the shared server
    pub proxy: ClientConfig,
}

impl Default for AmplifierConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            channel: 3,
            settle_off_ms: 400,
            settle_on_ms: 200,
            proxy: ClientConfig::new("power_supply"),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memory mode: skip flipping relays already believed to be in the
    /// desired state. Disabled by default so every routing call re-asserts
    /// the full path even if software state drifted from the hardware.
    pub remember_state: bool,
    /// How flips are produced
    pub mode: PulseMode,
    /// Pulse timing and amplitudes
    pub pulse: PulseConfig,
    /// Pulse generator selection
    pub generator: GeneratorConfig,
    /// Amplifier protection
    pub amplifier: AmplifierConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployed_values() {
        let config = EngineConfig::default();

        assert!(!config.remember_state);
        assert_eq!(config.mode, PulseMode::FunctionGenerator);
        assert_eq!(config.pulse.sleep_ms, 50);
        assert_eq!(config.pulse.cryo_amplitude, 2.5);
        assert_eq!(config.pulse.room_temp_amplitude, 5.0);
        assert_eq!(config.amplifier.channel, 3);
        assert_eq!(config.generator.proxy.instrument, "function_gen");
        assert_eq!(config.amplifier.proxy.instrument, "power_supply");
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig {
            remember_state: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert!(back.remember_state);
        assert_eq!(back.mode, config.mode);
    }
}

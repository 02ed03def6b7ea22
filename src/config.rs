//! Configuration
//!
//! Layered with figment: built-in defaults, then an optional JSON file,
//! then `FLOWSRV_`-prefixed environment variables. Saved back to disk as
//! pretty-printed JSON so hand edits survive round trips.

use std::path::Path;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::MAX_PORTS;
use crate::error::{ErrorExt, FlowSrvError, Result};

/// Configuration shared between the poll engine and the gateway
pub type SharedConfig = std::sync::Arc<tokio::sync::RwLock<AppConfig>>;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub gateway: GatewayConfig,
    pub polling: PollingConfig,
    pub ports: Vec<PortConfig>,
}

/// RS-485 bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    /// "none", "even" or "odd"
    pub parity: String,
    pub response_timeout_ms: u64,
}

/// TCP gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_clients: usize,
    pub idle_timeout_secs: u64,
}

/// Poll engine intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub trigger_check_ms: u64,
    pub periodic_poll_ms: u64,
    pub pending_sweep_ms: u64,
}

/// One flow-counter port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub name: String,
    pub slave_id: u8,
    pub enabled: bool,
    /// Hardware line sampled for this port's trigger edge
    pub trigger_input: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig {
                device: "/dev/ttyUSB0".to_string(),
                baud_rate: 9600,
                data_bits: 8,
                stop_bits: 1,
                parity: "none".to_string(),
                response_timeout_ms: 200,
            },
            gateway: GatewayConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 502,
                max_clients: 4,
                idle_timeout_secs: 300,
            },
            polling: PollingConfig {
                trigger_check_ms: 10,
                periodic_poll_ms: 60_000,
                pending_sweep_ms: 2_000,
            },
            ports: (0..MAX_PORTS)
                .map(|i| PortConfig {
                    name: format!("Counter {}", i + 1),
                    slave_id: (i + 1) as u8,
                    enabled: false,
                    trigger_input: i as u16,
                })
                .collect(),
        }
    }
}

impl SerialConfig {
    pub fn data_bits(&self) -> Result<tokio_serial::DataBits> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(FlowSrvError::ConfigError(format!(
                "unsupported data bits: {other}"
            ))),
        }
    }

    pub fn stop_bits(&self) -> Result<tokio_serial::StopBits> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(FlowSrvError::ConfigError(format!(
                "unsupported stop bits: {other}"
            ))),
        }
    }

    pub fn parity(&self) -> Result<tokio_serial::Parity> {
        match self.parity.to_ascii_lowercase().as_str() {
            "none" => Ok(tokio_serial::Parity::None),
            "even" => Ok(tokio_serial::Parity::Even),
            "odd" => Ok(tokio_serial::Parity::Odd),
            other => Err(FlowSrvError::ConfigError(format!(
                "unsupported parity: {other}"
            ))),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and environment.
    ///
    /// Nested keys use double underscores, e.g. `FLOWSRV_GATEWAY__PORT=1502`.
    /// An unreadable or invalid file is reported and ignored so the service
    /// still comes up on defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            let figment = base
                .clone()
                .merge(Json::file(path))
                .merge(Env::prefixed("FLOWSRV_").split("__"));
            match Self::extract(figment) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    warn!(path = %path.display(), "config file unusable, using defaults: {e}");
                }
            }
        }
        Self::extract(base.merge(Env::prefixed("FLOWSRV_").split("__")))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Persist the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).config_error("failed to write config file")?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.len() != MAX_PORTS {
            return Err(FlowSrvError::ConfigError(format!(
                "expected {MAX_PORTS} port entries, found {}",
                self.ports.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for (i, port) in self.ports.iter().enumerate() {
            if !(1..=247).contains(&port.slave_id) {
                return Err(FlowSrvError::ConfigError(format!(
                    "port {}: slave id {} outside 1..=247",
                    i + 1,
                    port.slave_id
                )));
            }
            if port.enabled && !seen.insert(port.slave_id) {
                return Err(FlowSrvError::ConfigError(format!(
                    "port {}: slave id {} already in use",
                    i + 1,
                    port.slave_id
                )));
            }
        }
        if self.gateway.max_clients == 0 {
            return Err(FlowSrvError::config("gateway.max_clients must be at least 1"));
        }
        if self.polling.trigger_check_ms == 0 || self.polling.periodic_poll_ms == 0 {
            return Err(FlowSrvError::config("polling intervals must be nonzero"));
        }
        self.serial.data_bits()?;
        self.serial.stop_bits()?;
        self.serial.parity()?;
        Ok(())
    }

    /// Slave id for an enabled port, if any
    pub fn slave_for_port(&self, index: usize) -> Option<u8> {
        self.ports
            .get(index)
            .filter(|p| p.enabled)
            .map(|p| p.slave_id)
    }

    /// Enabled port index serving the given slave id
    pub fn port_for_slave(&self, slave_id: u8) -> Option<usize> {
        self.ports
            .iter()
            .position(|p| p.enabled && p.slave_id == slave_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn default_intervals() {
        let config = AppConfig::default();
        assert_eq!(config.polling.trigger_check_ms, 10);
        assert_eq!(config.polling.periodic_poll_ms, 60_000);
        assert_eq!(config.polling.pending_sweep_ms, 2_000);
        assert_eq!(config.gateway.max_clients, 4);
        assert_eq!(config.gateway.idle_timeout_secs, 300);
    }

    #[test]
    fn rejects_duplicate_enabled_slave_ids() {
        let mut config = AppConfig::default();
        config.ports[0].enabled = true;
        config.ports[1].enabled = true;
        config.ports[1].slave_id = config.ports[0].slave_id;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_ids_allowed_while_disabled() {
        let mut config = AppConfig::default();
        config.ports[1].slave_id = config.ports[0].slave_id;
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_slave_id() {
        let mut config = AppConfig::default();
        config.ports[0].slave_id = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "gateway": {{ "port": 1502 }}, "polling": {{ "periodic_poll_ms": 10000 }} }}"#
        )
        .unwrap();
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.gateway.port, 1502);
        assert_eq!(config.polling.periodic_poll_ms, 10_000);
        // Untouched sections keep their defaults
        assert_eq!(config.gateway.max_clients, 4);
        assert_eq!(config.serial.baud_rate, 9600);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.gateway.port, 502);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.polling.periodic_poll_ms, 60_000);
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowsrv.json");
        let mut config = AppConfig::default();
        config.ports[2].enabled = true;
        config.ports[2].name = "Line 3".to_string();
        config.save(&path).unwrap();
        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.ports[2], config.ports[2]);
    }

    #[test]
    fn slave_lookup_skips_disabled_ports() {
        let mut config = AppConfig::default();
        config.ports[4].enabled = true;
        config.ports[4].slave_id = 42;
        assert_eq!(config.port_for_slave(42), Some(4));
        assert_eq!(config.port_for_slave(1), None);
        assert_eq!(config.slave_for_port(4), Some(42));
        assert_eq!(config.slave_for_port(0), None);
    }
}

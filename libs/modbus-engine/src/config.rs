//! Master and slave configuration
//!
//! Files are read with figment, format chosen by extension, then overlaid with
//! environment variables under a caller-chosen prefix. Nested keys use a
//! double underscore: `MBCTL_TRANSPORT__PORT=1502`.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModbusError, ModbusResult};
use crate::store::RegisterStore;
use crate::timing::RtuTiming;

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

impl SerialConfig {
    pub fn timing(&self) -> ModbusResult<RtuTiming> {
        RtuTiming::new(self.baud_rate, self.data_bits, self.stop_bits)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
}

impl TcpConfig {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_tcp_port(),
        }
    }
}

/// Wire variant and its link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Tcp(TcpConfig),
    Rtu(SerialConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Tcp(TcpConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    /// Default unit id for operations
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Per-request response deadline
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MasterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A run of consecutive values starting at `start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConfig<T> {
    pub start: u16,
    pub values: Vec<T>,
}

/// Initial contents of the four register banks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMapConfig {
    #[serde(default)]
    pub coils: Vec<SegmentConfig<bool>>,
    #[serde(default)]
    pub discrete_inputs: Vec<SegmentConfig<bool>>,
    #[serde(default)]
    pub holding_registers: Vec<SegmentConfig<u16>>,
    #[serde(default)]
    pub input_registers: Vec<SegmentConfig<u16>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveConfig {
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Capacity of the callback event queue
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
    #[serde(default)]
    pub registers: RegisterMapConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            unit_id: default_unit_id(),
            transport: TransportConfig::default(),
            event_queue: default_event_queue(),
            registers: RegisterMapConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SlaveConfig {
    /// Populate a register store from the configured segments
    pub fn build_store(&self) -> ModbusResult<RegisterStore> {
        let mut store = RegisterStore::new();
        for segment in &self.registers.coils {
            store.coils.add(segment.start, &segment.values)?;
        }
        for segment in &self.registers.discrete_inputs {
            store.discrete_inputs.add(segment.start, &segment.values)?;
        }
        for segment in &self.registers.holding_registers {
            store.holding_registers.add(segment.start, &segment.values)?;
        }
        for segment in &self.registers.input_registers {
            store.input_registers.add(segment.start, &segment.values)?;
        }
        Ok(store)
    }
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_tcp_port() -> u16 {
    502
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_event_queue() -> usize {
    64
}

/// Load a configuration file and overlay `<env_prefix>*` environment variables
pub fn load_config<T: DeserializeOwned>(
    path: impl AsRef<Path>,
    env_prefix: &str,
) -> ModbusResult<T> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ModbusError::config(format!("Invalid file extension: {}", path.display())))?;

    let figment = match extension {
        "json" => Figment::new().merge(Json::file(path)),
        "toml" => Figment::new().merge(Toml::file(path)),
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ModbusError::config(format!(
                "Unsupported config format: {extension}"
            )));
        },
    };

    debug!("Loading config: {}", path.display());
    let config = figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()?;
    Ok(config)
}

//! # Monitor Configuration
//!
//! The resolved configuration a monitor session runs with: where the device
//! is, how long to wait for it, and which registers to poll. Configurations
//! are persisted as pretty-printed JSON.
//!
//! ```rust
//! use modbus_monitor::config::{DeviceTarget, MonitorConfig};
//!
//! let config = MonitorConfig::simulator();
//! assert_eq!(config.device.to_string(), "127.0.0.1:502");
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSource, ScanConfig};
use crate::client::DEFAULT_IO_TIMEOUT_MS;
use crate::error::{MonitorError, MonitorResult};
use crate::protocol::{RegisterDescriptor, SlaveId, DEFAULT_SLAVE_ID};
use crate::utils::validation;

/// Delay before retrying a failed connection (5 seconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5000;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(format!("invalid stop bits: {} (must be 1 or 2)", other)),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Serial data bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(format!("invalid data bits: {} (must be 5-8)", other)),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Serial line parameters for an RTU link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub data_bits: DataBits,
}

impl SerialSettings {
    /// 8N1 settings for `path` at `baud_rate`
    pub fn new<S: Into<String>>(path: S, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            parity: Parity::None,
            stop_bits: StopBits::One,
            data_bits: DataBits::Eight,
        }
    }
}

/// Where the device lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "connection_type")]
pub enum DeviceTarget {
    #[serde(rename = "TCP")]
    Tcp { host: String, port: u16 },
    #[serde(rename = "RTU")]
    Serial(SerialSettings),
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTarget::Tcp { host, port } => write!(f, "{}:{}", host, port),
            DeviceTarget::Serial(settings) => f.write_str(&settings.path),
        }
    }
}

/// Whether register numbers are documented 0- or 1-based
///
/// Display only. Read requests always use the catalog address unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AddressBase {
    #[default]
    Zero,
    One,
}

impl TryFrom<u8> for AddressBase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AddressBase::Zero),
            1 => Ok(AddressBase::One),
            other => Err(format!("invalid start address: {} (must be 0 or 1)", other)),
        }
    }
}

impl fmt::Display for AddressBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-based", u8::from(*self))
    }
}

impl From<AddressBase> for u8 {
    fn from(base: AddressBase) -> Self {
        match base {
            AddressBase::Zero => 0,
            AddressBase::One => 1,
        }
    }
}

fn default_slave_id() -> SlaveId {
    DEFAULT_SLAVE_ID
}

fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

/// Resolved monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub device: DeviceTarget,
    #[serde(default = "default_slave_id")]
    pub default_slave_id: SlaveId,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Start a new cycle this long after the previous one; `None` reads
    /// on connect and on demand only
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
    #[serde(default)]
    pub address_base: AddressBase,
    #[serde(default)]
    pub registers: CatalogSource,
    #[serde(default)]
    pub description: String,
}

impl MonitorConfig {
    /// Configuration for a device at `target`, scanning with defaults
    pub fn new(device: DeviceTarget) -> Self {
        Self {
            device,
            default_slave_id: default_slave_id(),
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            refresh_interval_ms: None,
            address_base: AddressBase::Zero,
            registers: CatalogSource::Scan(ScanConfig::default()),
            description: String::new(),
        }
    }

    /// Local simulator preset (TCP 127.0.0.1:502)
    pub fn simulator() -> Self {
        let mut config = Self::new(DeviceTarget::Tcp {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
        });
        config.description = "Simulator (TCP 127.0.0.1:502)".to_string();
        config
    }

    /// Load a configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> MonitorResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: MonitorConfig = serde_json::from_str(&data)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> MonitorResult<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).map_err(|e| {
            MonitorError::configuration(format!("Cannot write {}: {}", path.display(), e))
        })?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check the configuration for values the session cannot run with
    pub fn validate(&self) -> MonitorResult<()> {
        validation::validate_slave_id(self.default_slave_id)?;
        if self.io_timeout_ms == 0 {
            return Err(MonitorError::configuration("I/O timeout must be positive"));
        }
        match &self.device {
            DeviceTarget::Tcp { host, port } => {
                if host.trim().is_empty() || *port == 0 {
                    return Err(MonitorError::configuration(format!(
                        "Invalid TCP target {}:{}",
                        host, port
                    )));
                }
            }
            DeviceTarget::Serial(settings) => {
                if settings.path.trim().is_empty() || settings.baud_rate == 0 {
                    return Err(MonitorError::configuration("Serial port and baud rate are required"));
                }
            }
        }
        if let CatalogSource::Scan(scan) = &self.registers {
            if scan.start_address > scan.end_address {
                return Err(MonitorError::configuration(format!(
                    "Scan start {} is past scan end {}",
                    scan.start_address, scan.end_address
                )));
            }
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_ms.map(Duration::from_millis)
    }

    /// Build the register catalog, filling in `default_slave_id`
    pub fn build_catalog(&self) -> MonitorResult<Vec<RegisterDescriptor>> {
        self.registers.build(self.default_slave_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RegisterKind;

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = MonitorConfig::new(DeviceTarget::Serial(SerialSettings::new("/dev/ttyUSB0", 19200)));
        config.address_base = AddressBase::One;
        config.save(&path).unwrap();

        let loaded = MonitorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"connection_type\": \"RTU\""));
        assert!(text.contains("\"stop_bits\": 1"));
    }

    #[test]
    fn test_minimal_tcp_json() {
        let json = r#"{
            "device": { "connection_type": "TCP", "host": "10.0.0.1", "port": 502 },
            "registers": { "mode": "scan", "start_address": 0, "end_address": 9, "kinds": ["Coil"] }
        }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.io_timeout(), Duration::from_millis(2000));
        assert_eq!(config.retry_delay(), Duration::from_millis(5000));
        assert_eq!(config.refresh_interval(), None);
        let catalog = config.build_catalog().unwrap();
        assert_eq!(catalog.len(), 10);
        assert!(catalog.iter().all(|r| r.kind == RegisterKind::Coil && r.slave_id == 1));
    }

    #[test]
    fn test_default_slave_id_reaches_catalog() {
        let json = r#"{
            "device": { "connection_type": "TCP", "host": "10.0.0.1", "port": 502 },
            "default_slave_id": 5,
            "registers": { "mode": "scan", "start_address": 0, "end_address": 1, "kinds": ["Coil"] }
        }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        let ids: Vec<_> = config.build_catalog().unwrap().iter().map(|r| r.slave_id).collect();
        assert_eq!(ids, vec![5, 5]);

        let json = r#"{
            "device": { "connection_type": "TCP", "host": "10.0.0.1", "port": 502 },
            "default_slave_id": 5,
            "registers": { "mode": "named", "registers": [
                { "description": "Flow", "address": 7, "type": "HoldingRegister", "format": "uint16" }
            ] }
        }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.build_catalog().unwrap()[0].slave_id, 5);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = MonitorConfig::simulator();
        config.default_slave_id = 0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::simulator();
        config.default_slave_id = 248;
        assert!(config.validate().is_err());

        let config = MonitorConfig::new(DeviceTarget::Tcp { host: String::new(), port: 502 });
        assert!(config.validate().is_err());

        let bad_bits = r#"{"path":"/dev/ttyS0","baud_rate":9600,"parity":"none","stop_bits":3,"data_bits":8}"#;
        assert!(serde_json::from_str::<SerialSettings>(bad_bits).is_err());
    }

    #[test]
    fn test_address_base_label() {
        assert_eq!(AddressBase::Zero.to_string(), "0-based");
        assert_eq!(AddressBase::One.to_string(), "1-based");
    }

    #[test]
    fn test_load_missing_file() {
        let err = MonitorConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, MonitorError::Configuration { .. }));
    }
}

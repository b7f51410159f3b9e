//! Media configuration
//!
//! Configuration is plain serde data: timeouts in seconds as floats, ports and
//! baud rates as either numbers or strings. Each config converts into the
//! settings of its backend, validating the values on the way.
//!
//! ```
//! use spodes::MediaConfig;
//!
//! let config: MediaConfig = serde_json::from_str(
//!     r#"{"media": "serial", "port": "COM5", "shared": true}"#,
//! ).unwrap();
//! assert!(matches!(config, MediaConfig::Serial(_)));
//! ```

use serde::{Deserialize, Serialize};
use spodes_ble::BleSettings;
use spodes_core::{MediaError, MediaResult, TimeoutPolicy};
use spodes_transport::{DEFAULT_BAUD_RATE, DEFAULT_PORT, NetworkSettings, SerialSettings};
use std::fmt;

/// A number that may also be written as a string, e.g. `4059` or `"4059"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(u64),
    Text(String),
}

impl Numeric {
    fn parse<T>(&self, name: &str) -> MediaResult<T>
    where
        T: TryFrom<u64> + std::str::FromStr,
    {
        let parsed = match self {
            Numeric::Number(value) => T::try_from(*value).ok(),
            Numeric::Text(text) => text.trim().parse::<T>().ok(),
        };
        parsed.ok_or_else(|| MediaError::InvalidConfig(format!("{name}: invalid value {self}")))
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Numeric::Number(value) => write!(f, "{value}"),
            Numeric::Text(text) => write!(f, "{text:?}"),
        }
    }
}

impl From<u64> for Numeric {
    fn from(value: u64) -> Self {
        Numeric::Number(value)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> Numeric {
    Numeric::Number(u64::from(DEFAULT_PORT))
}

fn default_baudrate() -> Numeric {
    Numeric::Number(u64::from(DEFAULT_BAUD_RATE))
}

fn network_connect() -> f64 {
    60.0
}

fn five_seconds() -> f64 {
    5.0
}

fn one_second() -> f64 {
    1.0
}

fn three_seconds() -> f64 {
    3.0
}

fn two_seconds() -> f64 {
    2.0
}

fn ten_seconds() -> f64 {
    10.0
}

/// TCP media configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: Numeric,
    #[serde(default = "network_connect")]
    pub to_connect: f64,
    #[serde(default = "five_seconds")]
    pub to_recv: f64,
    #[serde(default = "three_seconds")]
    pub to_close: f64,
    #[serde(default = "two_seconds")]
    pub to_drain: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            to_connect: network_connect(),
            to_recv: five_seconds(),
            to_close: three_seconds(),
            to_drain: two_seconds(),
        }
    }
}

impl NetworkConfig {
    pub fn timeouts(&self) -> MediaResult<TimeoutPolicy> {
        let policy = TimeoutPolicy::network()
            .with_connect(TimeoutPolicy::seconds("to_connect", self.to_connect)?)
            .with_recv(TimeoutPolicy::seconds("to_recv", self.to_recv)?)
            .with_close(TimeoutPolicy::seconds("to_close", self.to_close)?)
            .with_drain(TimeoutPolicy::seconds("to_drain", self.to_drain)?);
        policy.validate()?;
        Ok(policy)
    }

    pub fn settings(&self) -> MediaResult<NetworkSettings> {
        if self.host.trim().is_empty() {
            return Err(MediaError::InvalidConfig("host must not be empty".to_string()));
        }
        let port: u16 = self.port.parse("port")?;
        if port == 0 {
            return Err(MediaError::InvalidConfig("port must not be 0".to_string()));
        }
        Ok(NetworkSettings::new(self.host.trim(), port).with_timeouts(self.timeouts()?))
    }
}

/// Serial media configuration
///
/// With `shared` set the port is opened through the shared-line registry as
/// an RS-485 handle, and `to_line` bounds waiting for the line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: Numeric,
    #[serde(default = "five_seconds")]
    pub to_connect: f64,
    #[serde(default = "one_second")]
    pub to_recv: f64,
    #[serde(default = "three_seconds")]
    pub to_close: f64,
    #[serde(default = "two_seconds")]
    pub to_drain: f64,
    #[serde(default = "ten_seconds")]
    pub to_line: f64,
    #[serde(default)]
    pub shared: bool,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baudrate: default_baudrate(),
            to_connect: five_seconds(),
            to_recv: one_second(),
            to_close: three_seconds(),
            to_drain: two_seconds(),
            to_line: ten_seconds(),
            shared: false,
        }
    }

    pub fn timeouts(&self) -> MediaResult<TimeoutPolicy> {
        let policy = TimeoutPolicy::serial()
            .with_connect(TimeoutPolicy::seconds("to_connect", self.to_connect)?)
            .with_recv(TimeoutPolicy::seconds("to_recv", self.to_recv)?)
            .with_close(TimeoutPolicy::seconds("to_close", self.to_close)?)
            .with_drain(TimeoutPolicy::seconds("to_drain", self.to_drain)?)
            .with_line(TimeoutPolicy::seconds("to_line", self.to_line)?);
        policy.validate()?;
        Ok(policy)
    }

    pub fn settings(&self) -> MediaResult<SerialSettings> {
        if self.port.trim().is_empty() {
            return Err(MediaError::InvalidConfig("port must not be empty".to_string()));
        }
        let baud_rate: u32 = self.baudrate.parse("baudrate")?;
        if baud_rate == 0 {
            return Err(MediaError::InvalidConfig("baudrate must not be 0".to_string()));
        }
        Ok(SerialSettings::new(self.port.trim(), baud_rate).with_timeouts(self.timeouts()?))
    }
}

/// BLE media configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BleConfig {
    pub address: String,
    #[serde(default = "ten_seconds")]
    pub to_connect: f64,
    #[serde(default = "one_second")]
    pub to_recv: f64,
    #[serde(default = "ten_seconds")]
    pub to_close: f64,
    #[serde(default)]
    pub pairing: bool,
}

impl BleConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            to_connect: ten_seconds(),
            to_recv: one_second(),
            to_close: ten_seconds(),
            pairing: false,
        }
    }

    pub fn timeouts(&self) -> MediaResult<TimeoutPolicy> {
        let policy = TimeoutPolicy::ble()
            .with_connect(TimeoutPolicy::seconds("to_connect", self.to_connect)?)
            .with_recv(TimeoutPolicy::seconds("to_recv", self.to_recv)?)
            .with_close(TimeoutPolicy::seconds("to_close", self.to_close)?);
        policy.validate()?;
        Ok(policy)
    }

    pub fn settings(&self) -> MediaResult<BleSettings> {
        if self.address.trim().is_empty() {
            return Err(MediaError::InvalidConfig("address must not be empty".to_string()));
        }
        Ok(BleSettings::new(self.address.trim())
            .with_timeouts(self.timeouts()?)
            .with_pairing(self.pairing))
    }
}

/// Configuration of any media, tagged by `media`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "media", rename_all = "lowercase")]
pub enum MediaConfig {
    Network(NetworkConfig),
    Serial(SerialConfig),
    Ble(BleConfig),
}

impl MediaConfig {
    /// Check every value without building the media
    pub fn validate(&self) -> MediaResult<()> {
        match self {
            MediaConfig::Network(config) => config.settings().map(drop),
            MediaConfig::Serial(config) => config.settings().map(drop),
            MediaConfig::Ble(config) => config.settings().map(drop),
        }
    }
}

// src/config/model.rs

use serde::Deserialize;
use shared::constants::{DEFAULT_BUFFER_CAPACITY, HEADER_SIZE, PORT_NAME};
use std::{str::FromStr, time::Duration};
use thiserror::Error;

use crate::comms::dispatch::DEFAULT_RETRY_DELAY;
use crate::comms::events::Protocol;

/// Top-level runtime config
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub port:    PortConfig,
    pub reply:   ReplyConfig,
    pub output:  OutputConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]                   pub enable: bool,
    #[serde(default)]                   pub file:   Option<String>,
    #[serde(default = "default_level")] pub level:  String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

/// Fully-typed `[port]` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    pub name:            String,
    pub buffer_capacity: usize,
    pub protocol:        Protocol,
    /// `None` blocks in receive until a message arrives.
    pub receive_timeout: Option<Duration>,
    /// Pause after a failed receive.
    pub retry_delay:     Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            name:            PORT_NAME.into(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            protocol:        Protocol::Tagged,
            receive_timeout: None,
            retry_delay:     DEFAULT_RETRY_DELAY,
        }
    }
}

/// Mirror of the `[reply]` table
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ReplyConfig {
    /// Deny every access request instead of allowing it.
    #[serde(default)] pub block_by_default: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

/// Raw `[port]` entries from TOML
#[derive(Debug, Default, Deserialize)]
pub struct PortStub {
    #[serde(default)] pub name:            Option<String>,
    #[serde(default)] pub buffer_capacity: Option<usize>,
    #[serde(default)] pub protocol:        Option<String>,
    #[serde(default)] pub receive_timeout: Option<String>,
    #[serde(default)] pub retry_delay:     Option<String>,
}

/// Raw `[output]` entries from TOML
#[derive(Debug, Default, Deserialize)]
pub struct OutputStub {
    #[serde(default)] pub format: Option<String>,
}

/// The whole file as deserialized; every table is optional
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)] pub logging: LoggingConfig,
    #[serde(default)] pub port:    PortStub,
    #[serde(default)] pub reply:   ReplyConfig,
    #[serde(default)] pub output:  OutputStub,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid protocol '{0}' (expected tagged, legacy-text or legacy-access)")]
    InvalidProtocol(String),

    #[error("invalid output format '{0}' (expected text or json)")]
    InvalidFormat(String),

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("buffer_capacity {capacity} cannot hold a {protocol:?} message ({needed} bytes)")]
    BufferTooSmall { capacity: usize, needed: usize, protocol: Protocol },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Allow `"legacy-text"` → `Protocol::LegacyText`
impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "tagged"        => Ok(Protocol::Tagged),
            "legacy-text"   => Ok(Protocol::LegacyText),
            "legacy-access" => Ok(Protocol::LegacyAccess),
            other           => Err(ConfigError::InvalidProtocol(other.into())),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other  => Err(ConfigError::InvalidFormat(other.into())),
        }
    }
}

impl TryFrom<PortStub> for PortConfig {
    type Error = ConfigError;

    fn try_from(stub: PortStub) -> Result<Self, Self::Error> {
        let defaults = PortConfig::default();
        let protocol = match stub.protocol {
            Some(p) => p.parse::<Protocol>()?,
            None    => defaults.protocol,
        };
        let receive_timeout = stub
            .receive_timeout
            .map(|t| humantime::parse_duration(&t).map_err(|e| ConfigError::InvalidDuration(t, e)))
            .transpose()?
            .filter(|t| !t.is_zero());
        let retry_delay = match stub.retry_delay {
            Some(t) => humantime::parse_duration(&t).map_err(|e| ConfigError::InvalidDuration(t, e))?,
            None    => defaults.retry_delay,
        };

        let capacity = stub.buffer_capacity.unwrap_or(defaults.buffer_capacity);
        let needed = HEADER_SIZE + protocol.max_payload();
        if capacity < needed {
            return Err(ConfigError::BufferTooSmall { capacity, needed, protocol });
        }

        Ok(PortConfig {
            name: stub.name.unwrap_or(defaults.name),
            buffer_capacity: capacity,
            protocol,
            receive_timeout,
            retry_delay,
        })
    }
}

impl TryFrom<ConfigFile> for Config {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        Ok(Config {
            logging: file.logging,
            port:    file.port.try_into()?,
            reply:   file.reply,
            output:  OutputConfig {
                format: file
                    .output
                    .format
                    .as_deref()
                    .map(str::parse::<OutputFormat>)
                    .transpose()?
                    .unwrap_or_default(),
            },
        })
    }
}

// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads the TOML file, deserializes it into the raw `ConfigFile` mirror and
//! validates it into a typed `Config`.

use crate::agent_log;
use crate::config::model::{Config, ConfigError, ConfigFile};
use log::Level;
use std::{fs, path::Path};

/// Load and validate the configuration at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    agent_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse(&txt)?;
    agent_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Validate configuration text.
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(txt)?;
    file.try_into()
}

/// Like [`load`], but a missing file yields the built-in defaults.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() { load(path) } else { Ok(Config::default()) }
}

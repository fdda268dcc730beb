//! Configuration file loading.

use crate::config::{parse_configuration, Configuration};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the home directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = ".prometheus-cloudwatch-exporter.yaml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing `exporter` section in configuration")]
    Missing,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Default configuration path: `$HOME/.prometheus-cloudwatch-exporter.yaml`.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(DEFAULT_CONFIG_FILE)
}

/// Read a YAML file into an untyped document.
pub fn load_document<P: AsRef<Path>>(path: P) -> Result<Value, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let document = serde_yaml::from_str(&contents)?;
    Ok(document)
}

/// Load the metric configuration from a YAML file.
///
/// This function reads the file, parses the YAML, and builds the typed
/// configuration from its `exporter` section.
pub fn load_configuration<P: AsRef<Path>>(path: P) -> Result<Configuration, ConfigError> {
    let document = load_document(path)?;
    parse_configuration(&document)
}

//! Configuration
//!
//! Loaded from TOML; every section and field is optional.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! json = false
//!
//! [libraries]
//! Regress = "/opt/gi-tests/libregress.so"
//!
//! [marshal]
//! validate_zero_terminated = true
//! max_zero_terminated = 1048576
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{MarshalError, Result};
use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    /// Namespace to shared library path
    pub libraries: HashMap<String, String>,
    pub marshal: MarshalConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: bool,
    pub spans: bool,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarshalConfig {
    /// Reject zero-terminated arrays of floats or inline composites
    pub validate_zero_terminated: bool,
    /// Upper bound on elements scanned for a terminator
    pub max_zero_terminated: usize,
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self {
            validate_zero_terminated: true,
            max_zero_terminated: 1 << 20,
        }
    }
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| MarshalError::setup("configuration", e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| MarshalError::setup(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&source)
    }

    /// Library override for a namespace
    pub fn library_for(&self, namespace: &str) -> Option<&str> {
        self.libraries.get(namespace).map(String::as_str)
    }
}

impl LoggingConfig {
    /// Merge over environment-derived defaults
    pub fn to_log_config(&self) -> LogConfig {
        let mut config = LogConfig::from_env();
        if let Some(level) = self.level.as_deref() {
            config.level = crate::logging::parse_level(level);
        }
        config.json_format |= self.json;
        config.show_spans |= self.spans;
        if self.file.is_some() {
            config.log_path = self.file.clone();
        }
        config
    }
}

//! Configuration using Figment
//!
//! Configuration is loaded from a TOML file and then overridden by
//! environment variables prefixed with `VISA_PSU_`. Nested keys use a
//! double underscore:
//!
//! ```text
//! VISA_PSU_APPLICATION__LOG_LEVEL=debug
//! VISA_PSU_INSTRUMENT__RESOURCE="USB0::0xFFFF::0x9130::802200000000000000::INSTR"
//! VISA_PSU_INSTRUMENT__TIMEOUT_MS=500
//! ```
//!
//! Every field has a default, so an empty or missing file is valid.

use crate::psu::LockMode;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "VISA_PSU_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PsuConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instrument connection settings
    #[serde(default)]
    pub instrument: InstrumentConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// How to reach the instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Explicit VISA resource; the first discovered one is used when absent
    #[serde(default)]
    pub resource: Option<String>,
    /// Discovery expression (e.g. "USB?*")
    #[serde(default = "default_search_expression")]
    pub search_expression: String,
    /// I/O timeout and query settle delay in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Lock taken when opening
    #[serde(default)]
    pub lock_mode: LockMode,
    /// Buffer size for string attribute reads
    #[serde(default = "default_attr_max_length")]
    pub attr_max_length: usize,
    /// Buffer size for plain reads
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_search_expression() -> String {
    "?*".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_attr_max_length() -> usize {
    crate::visa::status::ATTR_MAX_LENGTH
}

fn default_read_buffer() -> usize {
    crate::visa::status::DEFAULT_READ_BUFFER
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            resource: None,
            search_expression: default_search_expression(),
            timeout_ms: default_timeout_ms(),
            lock_mode: LockMode::default(),
            attr_max_length: default_attr_max_length(),
            read_buffer: default_read_buffer(),
        }
    }
}

impl PsuConfig {
    /// Figment with `defaults`, `path` and the environment merged in order.
    pub fn figment<P: AsRef<Path>>(defaults: PsuConfig, path: P) -> Figment {
        Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file leaves the defaults in place.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the sources cannot be parsed or the result
    /// is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_defaults(PsuConfig::default(), path)
    }

    /// Like [`load_from`](Self::load_from), starting from caller-provided
    /// defaults instead of [`PsuConfig::default`].
    pub fn load_with_defaults<P: AsRef<Path>>(
        defaults: PsuConfig,
        path: P,
    ) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(defaults, path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::logging::parse_log_level(&self.application.log_level).map_err(|_| {
            ConfigError::Validation(format!(
                "Invalid application.log_level '{}'. Must be one of: trace, debug, info, warn, error",
                self.application.log_level
            ))
        })?;

        let instrument = &self.instrument;
        if let Some(resource) = &instrument.resource {
            if resource.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "instrument.resource cannot be empty".to_string(),
                ));
            }
        }
        if instrument.search_expression.is_empty() {
            return Err(ConfigError::Validation(
                "instrument.search_expression cannot be empty".to_string(),
            ));
        }
        if instrument.timeout_ms > crate::psu::bk9130b::MAX_TIMEOUT_MS {
            return Err(ConfigError::Validation(format!(
                "Invalid instrument.timeout_ms {}. Must be 0-{}",
                instrument.timeout_ms,
                crate::psu::bk9130b::MAX_TIMEOUT_MS
            )));
        }
        if instrument.attr_max_length < 2 {
            return Err(ConfigError::Validation(format!(
                "Invalid instrument.attr_max_length {}. Must be at least 2",
                instrument.attr_max_length
            )));
        }
        if instrument.read_buffer == 0 {
            return Err(ConfigError::Validation(
                "instrument.read_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

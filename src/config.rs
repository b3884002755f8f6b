//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/generator.toml` (or a path given by the caller)
//! 2. Environment variables prefixed with `SCPIGEN_`, nested keys separated by `__`
//!
//! Environment variables take precedence over the file:
//!
//! ```text
//! SCPIGEN_APPLICATION__LOG_LEVEL=debug
//! SCPIGEN_GENERATOR__ADDRESS=192.168.1.50
//! SCPIGEN_GENERATOR__TIMEOUT_MS=2500
//! ```
//!
//! # Example
//!
//! ```toml
//! [application]
//! name = "pulse-bench"
//! log_level = "info"
//!
//! [generator]
//! address = "192.168.1.50"
//! port = 5025
//! timeout_ms = 2000
//!
//! [setup]
//! frequency_hz = 9.4e9
//! power_dbm = -10.0
//! pulse_width_us = 1.0
//! pulse_period_us = 100.0
//! alc_off = true
//! ```

use crate::endpoint::{Endpoint, DEFAULT_SCPI_PORT};
use crate::engine::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS};
use crate::error::DeviceResult;
use crate::generator::GeneratorSetup;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// File read by [`GeneratorConfig::load`].
pub const DEFAULT_CONFIG_PATH: &str = "config/generator.toml";
/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SCPIGEN_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values were read but are out of range
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeneratorConfig {
    /// Logging and naming
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Where and how to connect
    pub generator: GeneratorSettings,
    /// Output setup applied by the `apply` command when no flags are given
    #[serde(default)]
    pub setup: Option<GeneratorSetup>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Name reported in the startup log
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Connection settings for the generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Literal IPv4 or IPv6 address
    pub address: String,
    /// TCP port, 5025 unless set
    #[serde(default = "default_port")]
    pub port: u32,
    /// Per-phase timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl GeneratorSettings {
    /// Validated endpoint built from address and port.
    pub fn endpoint(&self) -> DeviceResult<Endpoint> {
        Endpoint::new(&self.address, self.port)
    }
}

fn default_name() -> String {
    "scpi-generator".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_port() -> u32 {
    u32::from(DEFAULT_SCPI_PORT)
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Connection values given on the command line.
///
/// Layered after the file and the environment, so each one that is set wins
/// while everything else still comes from those sources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GeneratorOverrides {
    /// Replaces `generator.address`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Replaces `generator.port`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    /// Replaces `generator.timeout_ms`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Accepted `application.log_level` values.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
/// Accepted `application.log_format` values.
pub const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl GeneratorConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment, then validate.
    ///
    /// A missing file is not an error on its own; the environment may supply
    /// every required value.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_overrides(path, &GeneratorOverrides::default())
    }

    /// Like [`load_from`](Self::load_from), with `overrides` merged last.
    ///
    /// A malformed file or environment value is an error even when the
    /// overrides would supply the missing connection settings.
    pub fn load_with_overrides<P: AsRef<Path>>(
        path: P,
        overrides: &GeneratorOverrides,
    ) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path.as_ref())
            .merge(Serialized::default("generator", overrides))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::default("application", ApplicationConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level and log format are known
    /// - The generator address and port form a valid endpoint
    /// - The timeout does not exceed the ceiling
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if !VALID_LOG_FORMATS.contains(&self.application.log_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_LOG_FORMATS.join(", ")
            )));
        }

        self.generator
            .endpoint()
            .map_err(|e| ConfigError::ValidationError(format!("generator: {e}")))?;

        if self.generator.timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::ValidationError(format!(
                "Invalid timeout_ms {}. Must be at most {}",
                self.generator.timeout_ms, MAX_TIMEOUT_MS
            )));
        }

        if let Some(setup) = &self.setup {
            for (name, value) in [
                ("pulse_width_us", setup.pulse_width_us),
                ("pulse_period_us", setup.pulse_period_us),
            ] {
                if matches!(value, Some(v) if v <= 0.0 || !v.is_finite()) {
                    return Err(ConfigError::ValidationError(format!(
                        "setup: '{name}' must be a positive number"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn valid_config() -> GeneratorConfig {
        GeneratorConfig {
            application: ApplicationConfig::default(),
            generator: GeneratorSettings {
                address: "192.168.1.50".to_string(),
                ..Default::default()
            },
            setup: None,
        }
    }

    #[test]
    fn test_config_validation_valid() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        let endpoint = config.generator.endpoint().unwrap();
        assert_eq!(endpoint.port(), DEFAULT_SCPI_PORT);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.application.log_level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = valid_config();
        config.generator.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = valid_config();
        config.generator.address = "generator.lab".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_timeout_ceiling() {
        let mut config = valid_config();
        config.generator.timeout_ms = MAX_TIMEOUT_MS + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn test_negative_pulse_width_rejected() {
        let mut config = valid_config();
        config.setup = Some(GeneratorSetup {
            frequency_hz: 1e9,
            power_dbm: 0.0,
            pulse_width_us: Some(-1.0),
            pulse_period_us: None,
            alc_off: false,
            rf_on: true,
            display_off: false,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "generator.toml",
                r#"
                [application]
                log_level = "debug"

                [generator]
                address = "10.0.0.7"

                [setup]
                frequency_hz = 9.4e9
                power_dbm = -10.0
                "#,
            )?;
            jail.set_env("SCPIGEN_GENERATOR__TIMEOUT_MS", "2500");

            let config = GeneratorConfig::load_from("generator.toml")
                .map_err(|e| e.to_string())?;
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.application.log_format, "pretty");
            assert_eq!(config.generator.address, "10.0.0.7");
            assert_eq!(config.generator.port, 5025);
            assert_eq!(config.generator.timeout_ms, 2500);
            assert_eq!(config.setup.map(|s| s.power_dbm), Some(-10.0));
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "generator.toml",
                r#"
                [generator]
                address = "10.0.0.7"
                port = 70000
                "#,
            )?;

            let result = GeneratorConfig::load_from("generator.toml");
            assert!(matches!(result, Err(ConfigError::ValidationError(_))));
            Ok(())
        });
    }
}

//! Configuration management for loop daemons.
//!
//! Settings are layered with figment, later sources overriding earlier ones:
//!
//! 1. Default values
//! 2. Configuration file (`daemon.toml` unless another path is given)
//! 3. Environment variables prefixed with `DAEMON_` (`__` separates nested
//!    keys, e.g. `DAEMON_LOGGING__LEVEL=debug`)
//! 4. An optional caller-supplied provider

use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::signal::default_signals;

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level logging (most verbose)
    Trace,
    /// Debug level logging
    Debug,
    /// Info level logging (default)
    Info,
    /// Warning level logging
    Warn,
    /// Error level logging
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level
    pub level: LogLevel,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Enable colored output (ignored for JSON logs)
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            color: true,
        }
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment name. `CommandRunner::from_config` names the exclusive
    /// lock after it
    pub name: String,
    /// Time to live in seconds
    pub ttl_secs: Option<u64>,
    /// Memory threshold as a size string such as `"550M"`
    pub memory_max: Option<String>,
    /// Pause between iterations in microseconds
    pub loop_interval_us: Option<u64>,
    /// Signal numbers that trigger a shutdown
    pub signals: Vec<i32>,
    /// Logging configuration
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::from("loop-daemon"),
            ttl_secs: None,
            memory_max: None,
            loop_interval_us: None,
            signals: default_signals(),
            logging: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from [`crate::DEFAULT_CONFIG_FILE`] and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Will return an error if a source cannot be parsed or the result does
    /// not validate.
    pub fn load() -> Result<Self> {
        Self::load_from_file(crate::DEFAULT_CONFIG_FILE)
    }

    /// Load config from a TOML file, skipped when it does not exist.
    ///
    /// # Errors
    ///
    /// Will return an error if the file cannot be read or contains invalid configuration data.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }

        Self::extract(figment.merge(Self::env()))
    }

    /// Load config using a configuration provider on top of the environment.
    ///
    /// # Errors
    ///
    /// Will return an error if the provider fails to load a valid configuration.
    pub fn load_with_provider<P: Provider>(provider: P) -> Result<Self> {
        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Self::env())
                .merge(provider),
        )
    }

    fn env() -> Env {
        Env::prefixed("DAEMON_").split("__")
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the time to live as a Duration.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    /// Get the loop interval as a Duration.
    #[must_use]
    pub fn loop_interval(&self) -> Option<Duration> {
        self.loop_interval_us.map(Duration::from_micros)
    }

    /// Parse `memory_max` into bytes.
    ///
    /// # Errors
    ///
    /// Will return an invalid-format error if `memory_max` is malformed.
    pub fn memory_threshold(&self) -> Result<Option<u64>> {
        self.memory_max
            .as_deref()
            .map(crate::size::parse_byte_size)
            .transpose()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Will return an error if the name is empty or `memory_max` is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("Daemon name cannot be empty"));
        }

        self.memory_threshold()?;
        Ok(())
    }

    /// Check if JSON logging is enabled.
    #[must_use]
    pub const fn is_json_logging(&self) -> bool {
        self.logging.json
    }

    /// Check if colored logging is enabled.
    #[must_use]
    pub const fn is_colored_logging(&self) -> bool {
        self.logging.color && !self.logging.json
    }

    /// Create a builder for this configuration.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for creating configurations programmatically.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new configuration builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the daemon name.
    #[must_use]
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the time to live, rounded down to whole seconds.
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl_secs = Some(ttl.as_secs());
        self
    }

    /// Set the memory threshold.
    ///
    /// # Errors
    ///
    /// Will return an error if `limit` is not a valid size string.
    pub fn memory_max<S: Into<String>>(mut self, limit: S) -> Result<Self> {
        let limit = limit.into();
        crate::size::parse_byte_size(&limit)?;
        self.config.memory_max = Some(limit);
        Ok(self)
    }

    /// Set the loop interval
    ///
    /// # Errors
    ///
    /// Will return an error if the duration exceeds `u64::MAX` microseconds
    pub fn loop_interval(mut self, interval: Duration) -> Result<Self> {
        self.config.loop_interval_us = Some(
            u64::try_from(interval.as_micros())
                .map_err(|_| Error::config("Loop interval too large"))?,
        );
        Ok(self)
    }

    /// Set the handled signals.
    #[must_use]
    pub fn signals(mut self, signals: Vec<i32>) -> Self {
        self.config.signals = signals;
        self
    }

    /// Set the log level.
    #[must_use]
    pub const fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Enable JSON logging.
    #[must_use]
    pub const fn json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Will return an error if the configuration does not validate.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

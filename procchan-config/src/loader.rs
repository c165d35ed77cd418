//! Configuration loading and environment variable handling

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::domains::ProcchanConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "PROCCHAN".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ProcchanConfig> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let mut config: ProcchanConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ProcchanConfig> {
        let mut config = ProcchanConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ProcchanConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ProcchanConfig) -> ConfigResult<()> {
        self.apply_channel_overrides(&mut config.channel)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply channel config overrides
    fn apply_channel_overrides(
        &self,
        config: &mut crate::domains::channel::ChannelConfig,
    ) -> ConfigResult<()> {
        if let Some(timeout) = self.parse_millis("SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown_timeout = timeout;
        }

        if let Some(grace) = self.parse_millis("KILL_GRACE_MS")? {
            config.kill_grace = grace;
        }

        if let Some(drain) = self.parse_millis("EXIT_DRAIN_TIMEOUT_MS")? {
            config.exit_drain_timeout = drain;
        }

        if let Ok(mark) = self.get_env_var("HIGH_WATER_MARK") {
            config.high_water_mark = mark
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid HIGH_WATER_MARK: {}", e)))?;
        }

        if let Ok(policy) = self.get_env_var("THROTTLE_POLICY") {
            config.throttle_policy = policy.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid THROTTLE_POLICY: {}", e))
            })?;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = log_level
                .parse()
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = format
                .parse()
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    fn parse_millis(&self, name: &str) -> ConfigResult<Option<Duration>> {
        match self.get_env_var(name) {
            Ok(raw) => {
                let millis: u64 = raw
                    .parse()
                    .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e)))?;
                Ok(Some(Duration::from_millis(millis)))
            }
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

//! Domain-specific configuration modules

pub mod channel;
pub mod logging;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Top-level configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProcchanConfig {
    /// Worker channel lifecycle and backpressure
    #[serde(default)]
    pub channel: channel::ChannelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl ProcchanConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.channel.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Render the configuration as YAML, e.g. to seed a config file
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

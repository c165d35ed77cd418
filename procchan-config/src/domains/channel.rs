//! Worker channel configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// How the send queue reacts after each write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Throttle only when the transport reports saturation
    Signal,
    /// Throttle after every write and wait for its completion.
    ///
    /// Used where the saturation signal cannot be trusted (Windows).
    AlwaysAfterWrite,
}

impl ThrottlePolicy {
    /// The policy appropriate for the platform this binary was built for
    pub fn for_host() -> Self {
        if cfg!(windows) {
            ThrottlePolicy::AlwaysAfterWrite
        } else {
            ThrottlePolicy::Signal
        }
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self::for_host()
    }
}

impl FromStr for ThrottlePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "signal" => Ok(ThrottlePolicy::Signal),
            "always_after_write" | "always" => Ok(ThrottlePolicy::AlwaysAfterWrite),
            _ => Err(format!("Invalid throttle policy: {}", s)),
        }
    }
}

/// Worker channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// How long `stop` waits for a voluntary exit before interrupting the worker
    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,

    /// How long after the interrupt before the worker is killed outright
    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_kill_grace")]
    pub kill_grace: Duration,

    /// How long to keep draining worker output once the process has exited
    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_exit_drain_timeout")]
    pub exit_drain_timeout: Duration,

    /// Frames in flight to the worker at which the transport counts as saturated
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Throttle behaviour after writes
    #[serde(default)]
    pub throttle_policy: ThrottlePolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: default_shutdown_timeout(),
            kill_grace: default_kill_grace(),
            exit_drain_timeout: default_exit_drain_timeout(),
            high_water_mark: default_high_water_mark(),
            throttle_policy: ThrottlePolicy::default(),
        }
    }
}

impl Validatable for ChannelConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.shutdown_timeout.as_millis(),
            "shutdown_timeout",
            self.domain_name(),
        )?;

        validate_positive(self.kill_grace.as_millis(), "kill_grace", self.domain_name())?;

        validate_positive(self.high_water_mark, "high_water_mark", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "channel"
    }
}

// Default value functions
fn default_shutdown_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_kill_grace() -> Duration {
    Duration::from_millis(500)
}

fn default_exit_drain_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_high_water_mark() -> usize {
    64
}

//! Configuration for the state-variable consensus engine.
//!
//! The settings live under a `statevar` section of a node's YAML file (or
//! in a file of their own). Every field has a default, so an empty document
//! yields a working configuration. The update frequency and the quorum
//! fraction are network parameters: the engine's parameter hooks override
//! them at runtime.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Settings of the state-variable consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateVarConfig {
    /// Seconds between two runs of a time-triggered state variable.
    #[serde(default = "default_update_frequency_secs")]
    pub update_frequency_secs: u64,

    /// Fraction of the total voting power that must agree, in (0, 1].
    #[serde(default = "default_validators_vote_required")]
    pub validators_vote_required: Decimal,

    /// Seconds after which an unacknowledged self-proposal is resent.
    #[serde(default = "default_resend_after_secs")]
    pub resend_after_secs: u64,

    /// Superseded rounds while seeking consensus before `stale` is emitted.
    #[serde(default = "default_stale_after_rounds")]
    pub stale_after_rounds: u32,
}

impl Default for StateVarConfig {
    fn default() -> Self {
        Self {
            update_frequency_secs: default_update_frequency_secs(),
            validators_vote_required: default_validators_vote_required(),
            resend_after_secs: default_resend_after_secs(),
            stale_after_rounds: default_stale_after_rounds(),
        }
    }
}

impl StateVarConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is within its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validators_vote_required <= Decimal::ZERO
            || self.validators_vote_required > Decimal::ONE
        {
            return Err(ConfigError::Invalid {
                field: "validators_vote_required",
                reason: format!("{} is not in (0, 1]", self.validators_vote_required),
            });
        }
        if self.update_frequency_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "update_frequency_secs",
                reason: "must be positive".to_owned(),
            });
        }
        if self.stale_after_rounds == 0 {
            return Err(ConfigError::Invalid {
                field: "stale_after_rounds",
                reason: "must be positive".to_owned(),
            });
        }
        Ok(())
    }

    /// The update frequency as a [`Duration`].
    pub const fn update_frequency(&self) -> Duration {
        Duration::from_secs(self.update_frequency_secs)
    }

    /// The resend delay as a [`Duration`].
    pub const fn resend_after(&self) -> Duration {
        Duration::from_secs(self.resend_after_secs)
    }
}

const fn default_update_frequency_secs() -> u64 {
    300
}

fn default_validators_vote_required() -> Decimal {
    Decimal::new(67, 2)
}

const fn default_resend_after_secs() -> u64 {
    5
}

const fn default_stale_after_rounds() -> u32 {
    3
}

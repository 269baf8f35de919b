//! Simulator configuration.
//!
//! Read from `floatvar-sim.yaml` (or the path given on the command line).
//! The `statevar` section is the engine's own [`StateVarConfig`], so a
//! simulated committee runs with exactly the settings a node would.

use std::path::Path;

use floatvar_core::{ConfigError, StateVarConfig};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Top-level simulator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SimConfig {
    /// Engine settings shared by every validator.
    #[serde(default)]
    pub statevar: StateVarConfig,

    /// The simulated validator set.
    #[serde(default)]
    pub committee: CommitteeConfig,

    /// Block production.
    #[serde(default)]
    pub run: RunConfig,

    /// The state variable every validator calculates.
    #[serde(default)]
    pub risk: RiskConfig,
}

impl SimConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.statevar.validate()?;
        if config.committee.voting_powers.is_empty() {
            return Err(ConfigError::Invalid {
                field: "committee.voting_powers",
                reason: "at least one validator is required".to_owned(),
            });
        }
        if config.committee.voting_powers.iter().any(|power| *power <= 0) {
            return Err(ConfigError::Invalid {
                field: "committee.voting_powers",
                reason: "voting power must be positive".to_owned(),
            });
        }
        if config.risk.jitter.is_sign_negative() {
            return Err(ConfigError::Invalid {
                field: "risk.jitter",
                reason: "must not be negative".to_owned(),
            });
        }
        Ok(config)
    }
}

/// The simulated validator set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitteeConfig {
    /// Voting power of each validator, in node order.
    #[serde(default = "default_voting_powers")]
    pub voting_powers: Vec<i64>,
}

impl Default for CommitteeConfig {
    fn default() -> Self {
        Self {
            voting_powers: default_voting_powers(),
        }
    }
}

/// Block production settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Number of blocks to produce.
    #[serde(default = "default_blocks")]
    pub blocks: u32,

    /// Seconds between two blocks.
    #[serde(default = "default_block_interval_secs")]
    pub block_interval_secs: u32,

    /// Unix time of the first block.
    #[serde(default = "default_start_unix_secs")]
    pub start_unix_secs: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            blocks: default_blocks(),
            block_interval_secs: default_block_interval_secs(),
            start_unix_secs: default_start_unix_secs(),
        }
    }
}

/// The simulated risk-factor state variable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RiskConfig {
    /// Asset of the simulated market.
    #[serde(default = "default_asset")]
    pub asset: String,

    /// The simulated market.
    #[serde(default = "default_market")]
    pub market: String,

    /// Exact short risk factor before noise.
    #[serde(default = "default_base_short")]
    pub base_short: Decimal,

    /// Exact long risk factor before noise.
    #[serde(default = "default_base_long")]
    pub base_long: Decimal,

    /// Tolerance on each factor when comparing proposals.
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,

    /// Largest absolute noise a validator adds to each factor.
    #[serde(default = "default_jitter")]
    pub jitter: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            asset: default_asset(),
            market: default_market(),
            base_short: default_base_short(),
            base_long: default_base_long(),
            tolerance: default_tolerance(),
            jitter: default_jitter(),
        }
    }
}

fn default_voting_powers() -> Vec<i64> {
    vec![10, 20, 30, 40, 50]
}

const fn default_blocks() -> u32 {
    40
}

const fn default_block_interval_secs() -> u32 {
    1
}

const fn default_start_unix_secs() -> i64 {
    1_613_869_830
}

fn default_asset() -> String {
    "BTC".to_owned()
}

fn default_market() -> String {
    "BTC-PERP".to_owned()
}

fn default_base_short() -> Decimal {
    Decimal::new(125, 4)
}

fn default_base_long() -> Decimal {
    Decimal::new(131, 4)
}

fn default_tolerance() -> Decimal {
    Decimal::new(1, 3)
}

fn default_jitter() -> Decimal {
    Decimal::new(4, 4)
}

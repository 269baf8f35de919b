//! Enumerations for triggers and consensus lifecycle.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A market occurrence that can trigger recalculation of a state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum EventType {
    /// The market was enacted by governance.
    MarketEnactment,
    /// The market configuration was changed.
    MarketUpdated,
    /// The opening auction produced its first indicative uncrossing price.
    OpeningAuctionFirstUncrossingPrice,
    /// An auction period finished.
    AuctionEnded,
    /// The periodic update interval elapsed.
    TimeTrigger,
}

/// Where a state variable is in its calculation / agreement cycle.
///
/// The serialized form is the stable wire name published on the bus.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub enum ConsensusState {
    /// Never triggered.
    #[default]
    #[serde(rename = "undefined")]
    Unspecified,
    /// A calculation is running for the active event.
    #[serde(rename = "consensus_calc_started")]
    CalculationStarted,
    /// A quorum of validators proposed identical bundles.
    #[serde(rename = "perfect_match")]
    PerfectMatch,
    /// Quorum reached without identical bundles; searching within tolerance.
    #[serde(rename = "seeking_consensus")]
    SeekingConsensus,
    /// A candidate bundle gathered enough voting power within tolerance.
    #[serde(rename = "consensus_reached")]
    ConsensusReached,
    /// The active event was superseded by a newer one.
    #[serde(rename = "consensus_calc_aborted")]
    CalculationAborted,
    /// The local calculation failed.
    #[serde(rename = "error")]
    Error,
    /// Several consecutive rounds were superseded while seeking consensus.
    #[serde(rename = "stale")]
    Stale,
}

impl ConsensusState {
    /// Stable wire name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "undefined",
            Self::CalculationStarted => "consensus_calc_started",
            Self::PerfectMatch => "perfect_match",
            Self::SeekingConsensus => "seeking_consensus",
            Self::ConsensusReached => "consensus_reached",
            Self::CalculationAborted => "consensus_calc_aborted",
            Self::Error => "error",
            Self::Stale => "stale",
        }
    }

    /// Whether the state is a successful agreement.
    pub const fn is_resolved(self) -> bool {
        matches!(self, Self::PerfectMatch | Self::ConsensusReached)
    }
}

impl core::fmt::Display for ConsensusState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

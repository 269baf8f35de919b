//! The serialized state of the consensus engine.
//!
//! The payload is JSON with every decimal written as a string and every
//! collection in key order, so two nodes with the same state produce the
//! same bytes.

use floatvar_core::{StateVarInternalState, TimeTrigger};
use serde::{Deserialize, Serialize};

/// Namespace of the engine's snapshot state.
pub const NAMESPACE: &str = "floatingPointConsensus";

/// The single key the engine's state is stored under.
pub const KEY: &str = "floatingPointConsensus";

/// Everything needed to resume the engine on another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingPointConsensus {
    /// Scheduled runs of time-triggered variables.
    pub time_triggers: Vec<TimeTrigger>,
    /// The replicated state of every registered variable.
    pub state_variables: Vec<StateVarInternalState>,
}

impl FloatingPointConsensus {
    /// Encode as deterministic JSON bytes.
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode bytes produced by [`to_bytes`](Self::to_bytes).
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

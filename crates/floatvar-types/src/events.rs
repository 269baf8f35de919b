//! Payloads leaving the consensus engine.
//!
//! [`StateVarEvent`] is published on the event bus whenever a state variable
//! changes lifecycle state. [`StateValueProposal`] is what a validator hands
//! to its broadcaster: its own calculated bundle for an event.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::bundle::KeyValueBundle;
use crate::enums::ConsensusState;
use crate::ids::{EventId, StateVarId};

/// Lifecycle notification for one state variable and one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StateVarEvent {
    /// The state variable that changed.
    pub state_var_id: StateVarId,
    /// The event the change belongs to.
    pub event_id: EventId,
    /// The state entered, serialized by its wire name.
    pub state: ConsensusState,
}

/// A validator's calculated bundle for one event of one state variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateValueProposal {
    /// The state variable the bundle is for.
    pub state_var_id: StateVarId,
    /// The event the calculation answered.
    pub event_id: EventId,
    /// The calculated values.
    pub bundle: KeyValueBundle,
}

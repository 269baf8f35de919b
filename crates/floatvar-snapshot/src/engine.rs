//! [`StateProvider`] implementation for the consensus engine.
//!
//! Restoring happens in two phases. [`load_state`] rebuilds the time
//! schedule right away but only parks the variables' internal states: the
//! variables themselves do not exist yet, since their owners register them
//! while restoring their own state. [`on_state_loaded`] then replays the
//! parked states onto the registered variables.
//!
//! [`load_state`]: StateProvider::load_state
//! [`on_state_loaded`]: StateProvider::on_state_loaded

use std::ops::{Deref, DerefMut};

use floatvar_core::{Engine, StateVarInternalState};
use tracing::{debug, info};

use crate::payload::{FloatingPointConsensus, KEY, NAMESPACE};
use crate::provider::{Payload, SnapshotError, StateProvider};

/// An [`Engine`] that takes part in node snapshots.
///
/// Dereferences to the engine, so owners register their variables and the
/// node drives blocks through the wrapper.
#[derive(Debug)]
pub struct SnapshotEngine {
    engine: Engine,
    parked: Option<Vec<StateVarInternalState>>,
}

impl SnapshotEngine {
    /// Wrap an engine.
    pub const fn new(engine: Engine) -> Self {
        Self {
            engine,
            parked: None,
        }
    }

    /// Unwrap the engine.
    pub fn into_inner(self) -> Engine {
        self.engine
    }

    fn payload(&self) -> FloatingPointConsensus {
        FloatingPointConsensus {
            time_triggers: self.engine.time_triggers(),
            state_variables: self.engine.internal_states(),
        }
    }
}

impl Deref for SnapshotEngine {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        &self.engine
    }
}

impl DerefMut for SnapshotEngine {
    fn deref_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }
}

impl StateProvider for SnapshotEngine {
    fn namespace(&self) -> &'static str {
        NAMESPACE
    }

    fn keys(&self) -> Vec<String> {
        vec![KEY.to_owned()]
    }

    fn get_state(&mut self, key: &str) -> Result<Vec<u8>, SnapshotError> {
        if key != KEY {
            return Err(SnapshotError::UnknownKey {
                key: key.to_owned(),
            });
        }
        self.payload()
            .to_bytes()
            .map_err(|source| SnapshotError::Encode { source })
    }

    fn load_state(&mut self, payload: &Payload) -> Result<(), SnapshotError> {
        if payload.namespace != NAMESPACE {
            return Err(SnapshotError::WrongNamespace {
                expected: NAMESPACE,
                found: payload.namespace.clone(),
            });
        }
        if payload.key != KEY {
            return Err(SnapshotError::UnknownKey {
                key: payload.key.clone(),
            });
        }

        let state = FloatingPointConsensus::from_bytes(&payload.data)
            .map_err(|source| SnapshotError::Decode { source })?;
        info!(
            time_triggers = state.time_triggers.len(),
            state_variables = state.state_variables.len(),
            "Loading floating point consensus snapshot"
        );
        self.engine.restore_time_triggers(state.time_triggers);
        self.parked = Some(state.state_variables);
        Ok(())
    }

    fn on_state_loaded(&mut self) {
        let Some(states) = self.parked.take() else {
            return;
        };
        debug!(count = states.len(), "Restoring state variables");
        self.engine.restore_internal_states(states);
    }

    fn stopped(&self) -> bool {
        false
    }
}

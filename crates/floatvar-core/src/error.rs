//! Errors produced by the consensus engine and its collaborators.
//!
//! Only [`EngineError`] is ever returned to the engine's caller. The others
//! travel between the engine and owner or broadcaster code and end up in a
//! state event or a log line.

use floatvar_types::{EventId, StateVarId};

/// Errors returned by [`Engine`](crate::engine::Engine) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No state variable is registered under the identifier.
    #[error("unknown state variable {id}")]
    UnknownStateVariable {
        /// The identifier that was looked up.
        id: StateVarId,
    },

    /// A state variable with the same identifier is already registered.
    #[error("state variable {id} is already registered")]
    DuplicateStateVariable {
        /// The conflicting identifier.
        id: StateVarId,
    },
}

/// A failed owner calculation.
///
/// Surfaces only as the `error` state event for the active event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("calculation failed: {message}")]
pub struct CalculationError {
    /// Description supplied by the owner.
    pub message: String,
}

impl CalculationError {
    /// Create an error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An agreed bundle that does not fit the owner's native type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    /// A key the native type needs is absent.
    #[error("missing key {key}")]
    MissingKey {
        /// The absent key.
        key: String,
    },

    /// A key holds a value of the wrong shape.
    #[error("key {key} holds a {found}, expected a {expected}")]
    WrongKind {
        /// The offending key.
        key: String,
        /// The shape the native type needs.
        expected: &'static str,
        /// The shape found in the bundle.
        found: &'static str,
    },
}

/// A proposal the broadcaster could not submit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to submit proposal for {state_var_id} (event {event_id}): {message}")]
pub struct BroadcastError {
    /// The state variable of the rejected proposal.
    pub state_var_id: StateVarId,
    /// The event of the rejected proposal.
    pub event_id: EventId,
    /// Description supplied by the broadcaster.
    pub message: String,
}

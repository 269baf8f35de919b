//! Owner-side calculation plumbing.
//!
//! A state variable's owner supplies three things at registration: a
//! [`Converter`] between its native result type and a [`KeyValueBundle`], a
//! calculation starter, and a result callback. When an event fires the
//! engine hands the starter a [`CalculationHandle`]; the owner computes its
//! value (inline, on a thread, or on the `tokio` runtime via
//! [`CalculationHandle::spawn`]) and completes the handle with the outcome.
//!
//! # Design
//!
//! The handle holds only a weak reference to its state variable, so a
//! calculation that outlives an unregistered variable completes into
//! nothing. Completing consumes the handle, so a calculation reports at
//! most once.

use std::future::Future;
use std::sync::{Arc, Weak};

use floatvar_types::{EventId, KeyValueBundle};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{CalculationError, ConversionError};
use crate::state_var::StateVariable;

/// Conversion between an owner's native result and the bundle exchanged
/// between validators.
pub trait Converter: Send + Sync + 'static {
    /// The owner's result type.
    type Native: Send + 'static;

    /// Encode a native result. Keys, order and tolerances must be the same
    /// for every result of the variable.
    fn to_bundle(&self, native: &Self::Native) -> KeyValueBundle;

    /// Decode an agreed bundle.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] if the bundle does not have the shape of
    /// the native type.
    fn from_bundle(&self, bundle: &KeyValueBundle) -> Result<Self::Native, ConversionError>;
}

pub(crate) type Encoder<T> = Arc<dyn Fn(&T) -> KeyValueBundle + Send + Sync>;

/// The right to report the result of one calculation.
pub struct CalculationHandle<T> {
    event_id: EventId,
    state_var: Weak<StateVariable>,
    encode: Encoder<T>,
}

impl<T> CalculationHandle<T> {
    pub(crate) fn new(event_id: EventId, state_var: Weak<StateVariable>, encode: Encoder<T>) -> Self {
        Self {
            event_id,
            state_var,
            encode,
        }
    }

    /// The event this calculation answers.
    pub const fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Report the outcome of the calculation.
    ///
    /// A result for an event that has since been superseded is ignored, as
    /// is a result for a variable that has been unregistered.
    pub fn finish(self, result: Result<T, CalculationError>) {
        let Some(state_var) = self.state_var.upgrade() else {
            debug!(event_id = %self.event_id, "State variable gone, dropping calculation result");
            return;
        };
        let bundle = result.map(|native| (self.encode)(&native));
        state_var.calculation_finished(&self.event_id, bundle);
    }
}

impl<T: Send + 'static> CalculationHandle<T> {
    /// Run `calculation` on the `tokio` runtime and report its outcome.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio` runtime.
    pub fn spawn<F>(self, calculation: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<T, CalculationError>> + Send + 'static,
    {
        tokio::spawn(async move {
            let result = calculation.await;
            self.finish(result);
        })
    }
}

impl<T> core::fmt::Debug for CalculationHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CalculationHandle")
            .field("event_id", &self.event_id)
            .finish_non_exhaustive()
    }
}

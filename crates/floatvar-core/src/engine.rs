//! The state-variable consensus engine.
//!
//! The [`Engine`] owns every [`StateVariable`] of a node, routes market
//! events and received proposals to them, runs time-triggered variables on
//! schedule, and publishes their lifecycle events once per block.
//!
//! # Determinism
//!
//! Everything the engine decides must come out the same on every validator
//! at the same height:
//!
//! - the random number generator is reseeded from the block time in
//!   [`on_tick`](Engine::on_tick), so event ids and the tolerance candidate
//!   order match across nodes;
//! - all maps are ordered, so variables are visited in id order;
//! - time-trigger event ids are the block time itself.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use floatvar_types::{EventId, EventType, KeyValueBundle, NodeId, StateVarEvent, StateVarId};
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calculation::{CalculationHandle, Converter, Encoder};
use crate::collaborators::{Broadcaster, EventBus, Topology};
use crate::config::StateVarConfig;
use crate::error::EngineError;
use crate::state_var::{OwnerHooks, StateVarInternalState, StateVariable, Wiring};

/// Length of the random suffix of a market event id.
const EVENT_ID_SUFFIX_LEN: usize = 32;

/// `strftime` format of a time-trigger event id.
const TIME_TRIGGER_EVENT_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A scheduled run of a time-triggered state variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTrigger {
    /// Asset of the variable's market.
    pub asset: String,
    /// The variable's market.
    pub market: String,
    /// The variable.
    pub id: StateVarId,
    /// Earliest block time at which the variable runs again.
    pub next_trigger_time: DateTime<Utc>,
}

/// Coordinates every floating-point state variable of a node.
pub struct Engine {
    wiring: Wiring,
    event_bus: Arc<dyn EventBus>,
    update_frequency: TimeDelta,
    validators_vote_required: Decimal,
    state_vars: BTreeMap<StateVarId, Arc<StateVariable>>,
    event_type_index: BTreeMap<EventType, BTreeSet<StateVarId>>,
    next_time_trigger: BTreeMap<StateVarId, DateTime<Utc>>,
    ready_for_time_trigger: BTreeSet<(String, String)>,
    current_time: DateTime<Utc>,
    rng: StdRng,
}

impl Engine {
    /// Create an engine with no state variables.
    pub fn new(
        config: &StateVarConfig,
        topology: Arc<dyn Topology>,
        broadcaster: Arc<dyn Broadcaster>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            wiring: Wiring {
                topology,
                broadcaster,
                resend_after: to_time_delta(config.resend_after()),
                stale_after_rounds: config.stale_after_rounds,
            },
            event_bus,
            update_frequency: to_time_delta(config.update_frequency()),
            validators_vote_required: config.validators_vote_required,
            state_vars: BTreeMap::new(),
            event_type_index: BTreeMap::new(),
            next_time_trigger: BTreeMap::new(),
            ready_for_time_trigger: BTreeSet::new(),
            current_time: DateTime::<Utc>::UNIX_EPOCH,
            rng: StdRng::seed_from_u64(0),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register the state variable `name` of a market.
    ///
    /// `start_calculation` is called with a [`CalculationHandle`] each time
    /// one of `triggers` fires for the market; `on_result` receives every
    /// value the committee agrees on.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateStateVariable`] if the market
    /// already has a variable called `name`.
    #[allow(clippy::too_many_arguments)]
    pub fn register_state_variable<C, S, R>(
        &mut self,
        asset: &str,
        market: &str,
        name: &str,
        converter: C,
        start_calculation: S,
        triggers: &[EventType],
        on_result: R,
    ) -> Result<(), EngineError>
    where
        C: Converter,
        S: Fn(CalculationHandle<C::Native>) + Send + Sync + 'static,
        R: Fn(C::Native) + Send + Sync + 'static,
    {
        let id = StateVarId::from_parts(asset, market, name);
        if self.state_vars.contains_key(&id) {
            return Err(EngineError::DuplicateStateVariable { id });
        }

        let converter = Arc::new(converter);
        let encoder = Arc::clone(&converter);
        let encode: Encoder<C::Native> =
            Arc::new(move |native: &C::Native| encoder.to_bundle(native));
        let hooks = OwnerHooks {
            start: Box::new(move |event_id, state_var| {
                start_calculation(CalculationHandle::new(
                    event_id,
                    state_var,
                    Arc::clone(&encode),
                ));
            }),
            resolve: Box::new(move |bundle: &KeyValueBundle| {
                let native = converter.from_bundle(bundle)?;
                on_result(native);
                Ok(())
            }),
        };

        let state_var = StateVariable::new(id.clone(), asset, market, hooks, self.wiring.clone());
        self.state_vars.insert(id.clone(), state_var);
        for trigger in triggers {
            self.event_type_index
                .entry(*trigger)
                .or_default()
                .insert(id.clone());
        }

        if triggers.contains(&EventType::TimeTrigger)
            && self
                .ready_for_time_trigger
                .contains(&market_key(asset, market))
        {
            let next = self.after_update_interval(self.current_time);
            self.next_time_trigger.entry(id.clone()).or_insert(next);
        }

        info!(state_var = %id, ?triggers, "State variable registered");
        Ok(())
    }

    /// Remove every state variable of a market.
    ///
    /// The variables leave every index, including the time schedule, and
    /// the market is no longer armed for time triggers.
    pub fn unregister_state_variable(&mut self, asset: &str, market: &str) {
        let removed: BTreeSet<StateVarId> = self
            .state_vars
            .keys()
            .filter(|id| id.has_prefix(asset, market))
            .cloned()
            .collect();

        for id in &removed {
            self.state_vars.remove(id);
            self.next_time_trigger.remove(id);
            info!(state_var = %id, "State variable unregistered");
        }
        for ids in self.event_type_index.values_mut() {
            ids.retain(|id| !removed.contains(id));
        }
        self.event_type_index.retain(|_, ids| !ids.is_empty());
        self.ready_for_time_trigger
            .remove(&market_key(asset, market));
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Start a new round for every variable of the market triggered by
    /// `event_type`.
    pub fn new_event(&mut self, asset: &str, market: &str, event_type: EventType) {
        let event_id = self.generate_event_id(asset, market);
        let Some(ids) = self.event_type_index.get(&event_type) else {
            debug!(asset, market, ?event_type, "No state variable triggered by event");
            return;
        };

        debug!(asset, market, ?event_type, event_id = %event_id, "Market event");
        let next = self.after_update_interval(self.current_time);
        for id in ids.iter().filter(|id| id.has_prefix(asset, market)) {
            let Some(state_var) = self.state_vars.get(id) else {
                continue;
            };
            state_var.event_triggered(event_id.clone());
            if let Some(scheduled) = self.next_time_trigger.get_mut(id) {
                *scheduled = next;
            }
        }
    }

    /// Arm time triggers for a market.
    ///
    /// Until a market is armed its time-triggered variables never run. Once
    /// armed, they run at the first block at or after the current time.
    pub fn ready_for_time_trigger(&mut self, asset: &str, market: &str) {
        if !self
            .ready_for_time_trigger
            .insert(market_key(asset, market))
        {
            return;
        }

        debug!(asset, market, "Market ready for time triggers");
        let Some(ids) = self.event_type_index.get(&EventType::TimeTrigger) else {
            return;
        };
        for id in ids.iter().filter(|id| id.has_prefix(asset, market)) {
            self.next_time_trigger
                .entry(id.clone())
                .or_insert(self.current_time);
        }
    }

    // -----------------------------------------------------------------------
    // Block lifecycle
    // -----------------------------------------------------------------------

    /// Begin a block at `block_time`.
    ///
    /// Reseeds the random number generator from the block time, lets every
    /// variable resend overdue proposals, then runs each armed
    /// time-triggered variable whose scheduled time has come.
    pub fn on_tick(&mut self, block_time: DateTime<Utc>) {
        self.current_time = block_time;
        self.rng = StdRng::seed_from_u64(block_seed(block_time));

        for state_var in self.state_vars.values() {
            state_var.start_block(block_time);
        }

        let due: Vec<StateVarId> = self
            .next_time_trigger
            .iter()
            .filter(|(_, next)| **next <= block_time)
            .map(|(id, _)| id.clone())
            .collect();
        if due.is_empty() {
            return;
        }

        let event_id = EventId::new(block_time.format(TIME_TRIGGER_EVENT_FORMAT).to_string());
        let next = self.after_update_interval(block_time);
        for id in due {
            let Some(state_var) = self.state_vars.get(&id) else {
                continue;
            };
            let armed = self
                .ready_for_time_trigger
                .contains(&market_key(state_var.asset(), state_var.market()));
            if !armed {
                continue;
            }
            debug!(state_var = %id, event_id = %event_id, "Time trigger");
            state_var.event_triggered(event_id.clone());
            self.next_time_trigger.insert(id, next);
        }
    }

    /// End the current block: publish the state events queued by every
    /// variable as one batch.
    pub fn on_block_end(&mut self) {
        let events: Vec<StateVarEvent> = self
            .state_vars
            .values()
            .flat_map(|state_var| state_var.end_block())
            .collect();
        if events.is_empty() {
            return;
        }
        debug!(count = events.len(), "Publishing state variable events");
        self.event_bus.send_batch(events);
    }

    /// Deliver a validator's proposal for a state variable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownStateVariable`] if no variable is
    /// registered under `id`.
    pub fn proposed_value_received(
        &mut self,
        id: &StateVarId,
        node: &NodeId,
        event_id: &EventId,
        bundle: KeyValueBundle,
    ) -> Result<(), EngineError> {
        let Some(state_var) = self.state_vars.get(id) else {
            warn!(state_var = %id, node = %node, event_id = %event_id, "Proposal for unknown state variable");
            return Err(EngineError::UnknownStateVariable { id: id.clone() });
        };
        state_var.bundle_received(
            node,
            event_id,
            bundle,
            &mut self.rng,
            self.validators_vote_required,
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Network parameters
    // -----------------------------------------------------------------------

    /// Change the interval between two runs of a time-triggered variable.
    ///
    /// Applies from the next scheduled run onwards.
    pub fn on_floating_point_updates_duration_update(&mut self, frequency: Duration) {
        info!(frequency_secs = frequency.as_secs(), "Update frequency changed");
        self.update_frequency = to_time_delta(frequency);
    }

    /// Change the fraction of voting power required for agreement.
    pub fn on_default_validators_vote_required_update(&mut self, fraction: Decimal) {
        info!(%fraction, "Required vote fraction changed");
        self.validators_vote_required = fraction;
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Look up a registered state variable.
    pub fn state_variable(&self, id: &StateVarId) -> Option<&StateVariable> {
        self.state_vars.get(id).map(Arc::as_ref)
    }

    /// Identifiers of every registered state variable, in order.
    pub fn state_variable_ids(&self) -> Vec<StateVarId> {
        self.state_vars.keys().cloned().collect()
    }

    /// Time of the current block.
    pub const fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    /// When a time-triggered variable runs next, if it is scheduled.
    pub fn next_time_trigger(&self, id: &StateVarId) -> Option<DateTime<Utc>> {
        self.next_time_trigger.get(id).copied()
    }

    /// The current required vote fraction.
    pub const fn validators_vote_required(&self) -> Decimal {
        self.validators_vote_required
    }

    // -----------------------------------------------------------------------
    // Snapshot support
    // -----------------------------------------------------------------------

    /// Every scheduled time trigger, ordered by variable.
    pub fn time_triggers(&self) -> Vec<TimeTrigger> {
        self.next_time_trigger
            .iter()
            .filter_map(|(id, next)| {
                let state_var = self.state_vars.get(id)?;
                Some(TimeTrigger {
                    asset: state_var.asset().to_owned(),
                    market: state_var.market().to_owned(),
                    id: id.clone(),
                    next_trigger_time: *next,
                })
            })
            .collect()
    }

    /// The replicated state of every variable, ordered by variable.
    pub fn internal_states(&self) -> Vec<StateVarInternalState> {
        self.state_vars
            .values()
            .map(|state_var| state_var.internal_state())
            .collect()
    }

    /// Rebuild the time schedule and armed markets from a snapshot.
    pub fn restore_time_triggers(&mut self, triggers: Vec<TimeTrigger>) {
        for trigger in triggers {
            debug!(state_var = %trigger.id, next = %trigger.next_trigger_time, "Restoring time trigger");
            self.ready_for_time_trigger
                .insert((trigger.asset, trigger.market));
            self.next_time_trigger
                .insert(trigger.id, trigger.next_trigger_time);
        }
    }

    /// Replay the replicated state of each variable from a snapshot.
    ///
    /// # Panics
    ///
    /// Panics if a state refers to a variable that has not been registered:
    /// the node would otherwise diverge from the rest of the committee.
    #[allow(clippy::panic)]
    pub fn restore_internal_states(&mut self, states: Vec<StateVarInternalState>) {
        for state in states {
            let Some(state_var) = self.state_vars.get(&state.id) else {
                panic!("cannot restore state of unregistered state variable {}", state.id);
            };
            debug!(state_var = %state.id, state = %state.state, "Restoring state variable");
            state_var.restore_internal_state(state);
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn generate_event_id(&mut self, asset: &str, market: &str) -> EventId {
        let suffix: String = (&mut self.rng)
            .sample_iter(Alphanumeric)
            .take(EVENT_ID_SUFFIX_LEN)
            .map(char::from)
            .collect();
        EventId::new(format!("{asset}_{market}_{suffix}"))
    }

    fn after_update_interval(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from.checked_add_signed(self.update_frequency)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("current_time", &self.current_time)
            .field("state_vars", &self.state_vars.keys().collect::<Vec<_>>())
            .field("next_time_trigger", &self.next_time_trigger)
            .finish_non_exhaustive()
    }
}

fn market_key(asset: &str, market: &str) -> (String, String) {
    (asset.to_owned(), market.to_owned())
}

fn block_seed(block_time: DateTime<Utc>) -> u64 {
    u64::from_be_bytes(block_time.timestamp().to_be_bytes())
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

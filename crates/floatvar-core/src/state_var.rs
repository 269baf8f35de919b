//! The per-variable agreement state machine.
//!
//! A [`StateVariable`] tracks one calculation round at a time, identified by
//! its active [`EventId`]. When the round starts it asks the owner to
//! calculate; a validator then proposes its own result and collects the
//! proposals of the others. Once validators holding the required share of
//! voting power have proposed, the variable either finds them identical
//! (perfect match) or searches for a proposal that enough of the others
//! fall within tolerance of (tolerance consensus).
//!
//! # Design
//!
//! Every mutable field sits behind one [`Mutex`]. The lock is released
//! before calling into owner code (the calculation starter and the result
//! callback) and before handing a proposal to the broadcaster, so those may
//! call back into the variable from any thread.
//!
//! State changes are queued as [`StateVarEvent`]s and drained by the engine
//! at the end of the block.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, TimeDelta, Utc};
use floatvar_types::{
    ConsensusState, EventId, KeyValueBundle, NodeId, StateValueProposal, StateVarEvent, StateVarId,
};
use rand::Rng as _;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::collaborators::{Broadcaster, Topology};
use crate::error::{BroadcastError, CalculationError, ConversionError};

/// Starts the owner's calculation for an event.
pub(crate) type StartFn = Box<dyn Fn(EventId, Weak<StateVariable>) + Send + Sync>;

/// Converts an agreed bundle and hands it to the owner.
pub(crate) type ResolveFn = Box<dyn Fn(&KeyValueBundle) -> Result<(), ConversionError> + Send + Sync>;

/// The owner's type-erased callbacks.
pub(crate) struct OwnerHooks {
    pub start: StartFn,
    pub resolve: ResolveFn,
}

/// Collaborators and round settings shared by every variable of an engine.
#[derive(Clone)]
pub(crate) struct Wiring {
    pub topology: Arc<dyn Topology>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub resend_after: TimeDelta,
    pub stale_after_rounds: u32,
}

/// One validator's proposal, as kept in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBundle {
    /// The proposing validator.
    pub node_id: NodeId,
    /// What it proposed.
    pub bundle: KeyValueBundle,
}

/// The replicated part of a state variable's state.
///
/// Everything here is identical on every validator at the same height,
/// which is what makes it safe to snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVarInternalState {
    /// The state variable.
    pub id: StateVarId,
    /// The active event, if a round is in progress.
    pub event_id: Option<EventId>,
    /// The current lifecycle state.
    pub state: ConsensusState,
    /// Proposals received for the active event, sorted by node.
    pub validator_results: Vec<NodeBundle>,
    /// Rounds superseded while seeking consensus since the last agreement.
    pub rounds_since_meaningful_update: u32,
}

/// A self-proposal waiting for its own echo.
#[derive(Debug, Clone)]
struct SentProposal {
    proposal: StateValueProposal,
    sent_at: DateTime<Utc>,
    /// The broadcaster rejected the last submission; resend next block.
    failed: bool,
}

#[derive(Debug)]
struct Inner {
    state: ConsensusState,
    event_id: Option<EventId>,
    validator_results: BTreeMap<NodeId, KeyValueBundle>,
    rounds_since_meaningful_update: u32,
    pending_events: Vec<StateVarEvent>,
    current_time: DateTime<Utc>,
    awaiting_echo: Option<SentProposal>,
}

impl Inner {
    /// Move to `state` and queue the event for the active event id.
    fn enter(&mut self, id: &StateVarId, state: ConsensusState) {
        self.state = state;
        self.pending_events.push(StateVarEvent {
            state_var_id: id.clone(),
            event_id: self.event_id.clone().unwrap_or_default(),
            state,
        });
    }

    /// Enter a terminal state and put the round to rest.
    fn settle(&mut self, id: &StateVarId, state: ConsensusState) {
        self.enter(id, state);
        self.event_id = None;
        self.validator_results.clear();
        self.awaiting_echo = None;
        if state.is_resolved() {
            self.rounds_since_meaningful_update = 0;
        }
    }
}

/// A floating-point quantity agreed on by the validator committee.
pub struct StateVariable {
    id: StateVarId,
    asset: String,
    market: String,
    hooks: OwnerHooks,
    wiring: Wiring,
    me: Weak<Self>,
    inner: Mutex<Inner>,
}

impl StateVariable {
    pub(crate) fn new(
        id: StateVarId,
        asset: &str,
        market: &str,
        hooks: OwnerHooks,
        wiring: Wiring,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            asset: asset.to_owned(),
            market: market.to_owned(),
            hooks,
            wiring,
            me: me.clone(),
            inner: Mutex::new(Inner {
                state: ConsensusState::Unspecified,
                event_id: None,
                validator_results: BTreeMap::new(),
                rounds_since_meaningful_update: 0,
                pending_events: Vec::new(),
                current_time: DateTime::<Utc>::UNIX_EPOCH,
                awaiting_echo: None,
            }),
        })
    }

    /// The variable's identifier.
    pub const fn id(&self) -> &StateVarId {
        &self.id
    }

    /// The asset of the market the variable belongs to.
    pub fn asset(&self) -> &str {
        &self.asset
    }

    /// The market the variable belongs to.
    pub fn market(&self) -> &str {
        &self.market
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConsensusState {
        self.lock().state
    }

    /// The active event, if a round is in progress.
    pub fn event_id(&self) -> Option<EventId> {
        self.lock().event_id.clone()
    }

    /// Snapshot of the replicated state.
    pub fn internal_state(&self) -> StateVarInternalState {
        let inner = self.lock();
        StateVarInternalState {
            id: self.id.clone(),
            event_id: inner.event_id.clone(),
            state: inner.state,
            validator_results: inner
                .validator_results
                .iter()
                .map(|(node_id, bundle)| NodeBundle {
                    node_id: node_id.clone(),
                    bundle: bundle.clone(),
                })
                .collect(),
            rounds_since_meaningful_update: inner.rounds_since_meaningful_update,
        }
    }

    /// Replace the replicated state with a restored one.
    pub(crate) fn restore_internal_state(&self, restored: StateVarInternalState) {
        let mut inner = self.lock();
        inner.event_id = restored.event_id;
        inner.state = restored.state;
        inner.validator_results = restored
            .validator_results
            .into_iter()
            .map(|entry| (entry.node_id, entry.bundle))
            .collect();
        inner.rounds_since_meaningful_update = restored.rounds_since_meaningful_update;
        inner.awaiting_echo = None;
    }

    // -----------------------------------------------------------------------
    // Round lifecycle
    // -----------------------------------------------------------------------

    /// Start a new round for `event_id`, aborting any round in progress.
    pub(crate) fn event_triggered(&self, event_id: EventId) {
        {
            let mut inner = self.lock();
            if let Some(active) = inner.event_id.clone() {
                debug!(
                    state_var = %self.id,
                    aborted = %active,
                    event_id = %event_id,
                    "Aborting calculation superseded by a new event"
                );
                inner.awaiting_echo = None;
                if inner.state == ConsensusState::SeekingConsensus {
                    inner.rounds_since_meaningful_update =
                        inner.rounds_since_meaningful_update.saturating_add(1);
                    if inner.rounds_since_meaningful_update >= self.wiring.stale_after_rounds {
                        warn!(
                            state_var = %self.id,
                            rounds = inner.rounds_since_meaningful_update,
                            "No consensus reached in consecutive rounds"
                        );
                        inner.enter(&self.id, ConsensusState::Stale);
                    }
                }
                inner.enter(&self.id, ConsensusState::CalculationAborted);
            }

            inner.event_id = Some(event_id.clone());
            inner.validator_results.clear();
            inner.enter(&self.id, ConsensusState::CalculationStarted);
        }

        debug!(state_var = %self.id, event_id = %event_id, "Calculation started");
        (self.hooks.start)(event_id, self.me.clone());
    }

    /// Accept the local calculation outcome for `event_id`.
    pub(crate) fn calculation_finished(
        &self,
        event_id: &EventId,
        result: Result<KeyValueBundle, CalculationError>,
    ) {
        let proposal = {
            let mut inner = self.lock();
            if inner.event_id.as_ref() != Some(event_id) {
                warn!(
                    state_var = %self.id,
                    event_id = %event_id,
                    active = ?inner.event_id,
                    "Ignoring calculation result for an inactive event"
                );
                return;
            }

            let bundle = match result {
                Ok(bundle) => bundle,
                Err(err) => {
                    error!(state_var = %self.id, event_id = %event_id, %err, "Calculation failed");
                    inner.settle(&self.id, ConsensusState::Error);
                    return;
                }
            };

            if !self.wiring.topology.is_validator() {
                debug!(state_var = %self.id, event_id = %event_id, "Not a validator, not proposing");
                return;
            }

            let proposal = StateValueProposal {
                state_var_id: self.id.clone(),
                event_id: event_id.clone(),
                bundle,
            };
            inner.awaiting_echo = Some(SentProposal {
                proposal: proposal.clone(),
                sent_at: inner.current_time,
                failed: false,
            });
            proposal
        };

        debug!(state_var = %self.id, event_id = %event_id, "Submitting calculated value");
        self.submit(proposal);
    }

    /// Record the block time and resend a self-proposal that was rejected
    /// or has not been echoed in time.
    pub(crate) fn start_block(&self, block_time: DateTime<Utc>) {
        let resend = {
            let mut inner = self.lock();
            inner.current_time = block_time;
            if inner.event_id.is_none() {
                None
            } else {
                let resend_after = self.wiring.resend_after;
                inner.awaiting_echo.as_mut().and_then(|sent| {
                    let overdue = sent
                        .sent_at
                        .checked_add_signed(resend_after)
                        .is_some_and(|deadline| block_time > deadline);
                    (sent.failed || overdue).then(|| {
                        sent.sent_at = block_time;
                        sent.failed = false;
                        sent.proposal.clone()
                    })
                })
            }
        };

        if let Some(proposal) = resend {
            warn!(
                state_var = %self.id,
                event_id = %proposal.event_id,
                "Own proposal not seen in time, resending"
            );
            self.submit(proposal);
        }
    }

    /// Drain the state events queued during the block.
    pub(crate) fn end_block(&self) -> Vec<StateVarEvent> {
        std::mem::take(&mut self.lock().pending_events)
    }

    // -----------------------------------------------------------------------
    // Agreement
    // -----------------------------------------------------------------------

    /// Record a validator's proposal and try to agree.
    pub(crate) fn bundle_received(
        &self,
        node: &NodeId,
        event_id: &EventId,
        bundle: KeyValueBundle,
        rng: &mut StdRng,
        votes_required: Decimal,
    ) {
        let agreed = {
            let mut inner = self.lock();
            if inner.event_id.as_ref() != Some(event_id) {
                debug!(
                    state_var = %self.id,
                    event_id = %event_id,
                    node = %node,
                    "Ignoring proposal for an inactive event"
                );
                return;
            }
            let topology = &self.wiring.topology;
            if !topology.is_validator_node(node) {
                debug!(state_var = %self.id, node = %node, "Ignoring proposal from a non-validator");
                return;
            }
            if topology.self_node_id() == *node {
                inner.awaiting_echo = None;
            }
            if inner.state.is_resolved() {
                debug!(state_var = %self.id, node = %node, "Already resolved, ignoring proposal");
                return;
            }

            inner.validator_results.insert(node.clone(), bundle);

            let required_power =
                votes_required.saturating_mul(Decimal::from(topology.total_voting_power()));
            let received_power = self.voting_power_of(inner.validator_results.keys());
            if received_power < required_power {
                debug!(
                    state_var = %self.id,
                    event_id = %event_id,
                    %received_power,
                    %required_power,
                    "Waiting for more proposals"
                );
                return;
            }

            if inner.state == ConsensusState::SeekingConsensus {
                self.try_consensus(&mut inner, rng, required_power)
            } else if all_equal(&inner.validator_results) {
                let accepted = inner.validator_results.values().next().cloned();
                debug!(state_var = %self.id, event_id = %event_id, "Perfect match");
                inner.settle(&self.id, ConsensusState::PerfectMatch);
                accepted
            } else {
                inner.state = ConsensusState::SeekingConsensus;
                self.try_consensus(&mut inner, rng, required_power)
            }
        };

        if let Some(bundle) = agreed {
            self.resolve(&bundle);
        }
    }

    /// Search for a proposal that enough voting power is within tolerance of.
    ///
    /// Candidates are drawn in a block-seeded random order over the sorted
    /// node ids, so every validator examines them in the same order.
    fn try_consensus(
        &self,
        inner: &mut Inner,
        rng: &mut StdRng,
        required_power: Decimal,
    ) -> Option<KeyValueBundle> {
        let node_ids: Vec<NodeId> = inner.validator_results.keys().cloned().collect();
        let mut checked = BTreeSet::new();

        while checked.len() < node_ids.len() {
            let Some(candidate_id) = node_ids.get(rng.random_range(0..node_ids.len())) else {
                break;
            };
            if !checked.insert(candidate_id) {
                continue;
            }
            let Some(candidate) = inner.validator_results.get(candidate_id) else {
                continue;
            };

            let matching_power = self.voting_power_of(
                inner
                    .validator_results
                    .iter()
                    .filter(|(_, bundle)| bundle.within_tolerance(candidate))
                    .map(|(node, _)| node),
            );
            if matching_power >= required_power {
                let accepted = candidate.clone();
                debug!(
                    state_var = %self.id,
                    candidate = %candidate_id,
                    %matching_power,
                    %required_power,
                    "Consensus reached within tolerance"
                );
                inner.settle(&self.id, ConsensusState::ConsensusReached);
                return Some(accepted);
            }
        }

        debug!(
            state_var = %self.id,
            proposals = node_ids.len(),
            "No proposal has enough support within tolerance"
        );
        None
    }

    /// Hand the agreed bundle to the owner.
    fn resolve(&self, bundle: &KeyValueBundle) {
        if let Err(err) = (self.hooks.resolve)(bundle) {
            error!(state_var = %self.id, %err, "Agreed value does not convert to the native type");
        }
    }

    fn voting_power_of<'a>(&self, nodes: impl Iterator<Item = &'a NodeId>) -> Decimal {
        nodes.fold(Decimal::ZERO, |total, node| {
            total.saturating_add(Decimal::from(self.wiring.topology.voting_power(node)))
        })
    }

    // -----------------------------------------------------------------------
    // Broadcast
    // -----------------------------------------------------------------------

    /// Hand a proposal to the broadcaster. Never called with the lock held.
    fn submit(&self, proposal: StateValueProposal) {
        let me = self.me.clone();
        let retry = proposal.clone();
        self.wiring.broadcaster.submit(
            proposal,
            Box::new(move |outcome| {
                let Err(err) = outcome else {
                    return;
                };
                if let Some(state_var) = me.upgrade() {
                    state_var.submission_failed(&err, retry);
                }
            }),
        );
    }

    /// Queue a rejected proposal for the next block while its event is
    /// still active. Never resubmits inline: the callback may run inside
    /// `submit` itself.
    fn submission_failed(&self, err: &BroadcastError, proposal: StateValueProposal) {
        let mut inner = self.lock();
        if inner.event_id.as_ref() == Some(&proposal.event_id) {
            error!(state_var = %self.id, %err, "Failed to submit proposal, retrying next block");
            let sent_at = inner.current_time;
            inner.awaiting_echo = Some(SentProposal {
                proposal,
                sent_at,
                failed: true,
            });
        } else {
            debug!(
                state_var = %self.id,
                event_id = %proposal.event_id,
                %err,
                "Failed to submit proposal for a superseded event, dropping"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl core::fmt::Debug for StateVariable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateVariable")
            .field("id", &self.id)
            .field("asset", &self.asset)
            .field("market", &self.market)
            .finish_non_exhaustive()
    }
}

fn all_equal(results: &BTreeMap<NodeId, KeyValueBundle>) -> bool {
    let mut bundles = results.values();
    bundles
        .next()
        .is_none_or(|first| bundles.all(|bundle| bundle.equals(first)))
}

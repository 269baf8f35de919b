//! Shared harness for the engine integration tests: a fixed five-validator
//! topology, recording collaborators and a two-key sample state variable.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use floatvar_core::collaborators::SubmitCallback;
use floatvar_core::{
    BroadcastError, Broadcaster, CalculationError, CalculationHandle, ConversionError, Converter,
    Engine, EventBus, StateVarConfig, Topology,
};
use floatvar_types::{
    ConsensusState, EventId, EventType, KeyValueBundle, NodeId, StateValueProposal,
    StateVarEvent, StateVarId, Value,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::task::JoinHandle;

pub const ASSET: &str = "asset";
pub const MARKET: &str = "market";
pub const NAME: &str = "risk";

/// Validators and their voting power.
pub const POWERS: [(&str, i64); 5] = [("0", 10), ("1", 20), ("2", 30), ("3", 40), ("4", 50)];

/// Total voting power reported by the registry; quorum at 0.67 is 67.
pub const TOTAL_POWER: i64 = 100;

pub fn state_var_id() -> StateVarId {
    StateVarId::from_parts(ASSET, MARKET, NAME)
}

/// 2021-02-21 01:10:30 UTC.
pub fn genesis() -> DateTime<Utc> {
    DateTime::from_timestamp(1_613_869_830, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    genesis().checked_add_signed(TimeDelta::seconds(secs)).unwrap()
}

pub fn config() -> StateVarConfig {
    StateVarConfig {
        update_frequency_secs: 10,
        ..StateVarConfig::default()
    }
}

// =============================================================================
// Sample state variable
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleParams {
    pub param1: Decimal,
    pub param2: Vec<Decimal>,
}

pub fn params(param1: Decimal, param2: Decimal) -> SampleParams {
    SampleParams {
        param1,
        param2: vec![param2],
    }
}

pub fn sample() -> SampleParams {
    SampleParams {
        param1: dec!(1.23456789),
        param2: vec![dec!(1.1), dec!(2.2), dec!(3.3), dec!(4.4)],
    }
}

pub struct SampleConverter;

impl Converter for SampleConverter {
    type Native = SampleParams;

    fn to_bundle(&self, native: &SampleParams) -> KeyValueBundle {
        KeyValueBundle::new()
            .with("param1", Value::Scalar(native.param1), dec!(1))
            .with("param2", Value::Vector(native.param2.clone()), dec!(2))
    }

    fn from_bundle(&self, bundle: &KeyValueBundle) -> Result<SampleParams, ConversionError> {
        let param1 = match bundle.get("param1").map(|entry| &entry.value) {
            Some(Value::Scalar(value)) => *value,
            Some(other) => {
                return Err(ConversionError::WrongKind {
                    key: "param1".to_owned(),
                    expected: "scalar",
                    found: other.kind(),
                });
            }
            None => {
                return Err(ConversionError::MissingKey {
                    key: "param1".to_owned(),
                });
            }
        };
        let param2 = match bundle.get("param2").map(|entry| &entry.value) {
            Some(Value::Vector(values)) => values.clone(),
            Some(other) => {
                return Err(ConversionError::WrongKind {
                    key: "param2".to_owned(),
                    expected: "vector",
                    found: other.kind(),
                });
            }
            None => {
                return Err(ConversionError::MissingKey {
                    key: "param2".to_owned(),
                });
            }
        };
        Ok(SampleParams { param1, param2 })
    }
}

/// What the owner's calculation does when started.
#[derive(Debug, Clone)]
pub enum Calc {
    /// Finish immediately with the value.
    Returns(SampleParams),
    /// Finish immediately with an error.
    Fails,
    /// Keep the handle for the test to finish.
    Deferred,
    /// Finish with the value from a task on the `tokio` runtime.
    Spawned(SampleParams),
}

// =============================================================================
// Collaborators
// =============================================================================

pub struct StaticTopology {
    self_id: NodeId,
    powers: BTreeMap<NodeId, i64>,
}

impl StaticTopology {
    pub fn new(self_id: &str) -> Self {
        Self {
            self_id: NodeId::from(self_id),
            powers: POWERS
                .iter()
                .map(|(node, power)| (NodeId::from(*node), *power))
                .collect(),
        }
    }
}

impl Topology for StaticTopology {
    fn is_validator(&self) -> bool {
        self.powers.contains_key(&self.self_id)
    }

    fn is_validator_node(&self, node: &NodeId) -> bool {
        self.powers.contains_key(node)
    }

    fn all_node_ids(&self) -> Vec<NodeId> {
        self.powers.keys().cloned().collect()
    }

    fn self_node_id(&self) -> NodeId {
        self.self_id.clone()
    }

    fn total_voting_power(&self) -> i64 {
        TOTAL_POWER
    }

    fn voting_power(&self, node: &NodeId) -> i64 {
        self.powers.get(node).copied().unwrap_or_default()
    }
}

#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<StateVarEvent>>,
}

impl EventBus for RecordingBus {
    fn send(&self, event: StateVarEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Records every submission and keeps the completion callbacks until the
/// test settles them, or rejects each one before `submit` returns.
#[derive(Default)]
pub struct RecordingBroadcaster {
    submitted: Mutex<Vec<StateValueProposal>>,
    pending: Mutex<Vec<(StateValueProposal, SubmitCallback)>>,
    reject_inline: bool,
}

fn rejection(proposal: StateValueProposal) -> BroadcastError {
    BroadcastError {
        state_var_id: proposal.state_var_id,
        event_id: proposal.event_id,
        message: "mempool full".to_owned(),
    }
}

impl RecordingBroadcaster {
    /// A broadcaster whose every submission fails synchronously.
    pub fn rejecting() -> Self {
        Self {
            reject_inline: true,
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<StateValueProposal> {
        self.submitted.lock().unwrap().clone()
    }

    /// Fail every outstanding submission.
    pub fn fail_pending(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for (proposal, on_done) in pending {
            on_done(Err(rejection(proposal)));
        }
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn submit(&self, proposal: StateValueProposal, on_done: SubmitCallback) {
        self.submitted.lock().unwrap().push(proposal.clone());
        if self.reject_inline {
            on_done(Err(rejection(proposal)));
        } else {
            self.pending.lock().unwrap().push((proposal, on_done));
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// One node: an engine wired to recording collaborators.
pub struct Node {
    pub engine: Engine,
    pub bus: Arc<RecordingBus>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    calc: Calc,
    results: Arc<Mutex<Vec<SampleParams>>>,
    handles: Arc<Mutex<Vec<CalculationHandle<SampleParams>>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Node {
    pub fn new(self_id: &str, calc: Calc) -> Self {
        Self::with_broadcaster(self_id, calc, RecordingBroadcaster::default())
    }

    pub fn with_broadcaster(self_id: &str, calc: Calc, broadcaster: RecordingBroadcaster) -> Self {
        let bus = Arc::new(RecordingBus::default());
        let broadcaster = Arc::new(broadcaster);
        let engine = Engine::new(
            &config(),
            Arc::new(StaticTopology::new(self_id)),
            Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
        );
        Self {
            engine,
            bus,
            broadcaster,
            calc,
            results: Arc::default(),
            handles: Arc::default(),
            tasks: Arc::default(),
        }
    }

    pub fn register(&mut self, triggers: &[EventType]) {
        let calc = self.calc.clone();
        let handles = Arc::clone(&self.handles);
        let tasks = Arc::clone(&self.tasks);
        let results = Arc::clone(&self.results);
        self.engine
            .register_state_variable(
                ASSET,
                MARKET,
                NAME,
                SampleConverter,
                move |handle: CalculationHandle<SampleParams>| match &calc {
                    Calc::Returns(value) => handle.finish(Ok(value.clone())),
                    Calc::Fails => handle.finish(Err(CalculationError::new("no price yet"))),
                    Calc::Deferred => handles.lock().unwrap().push(handle),
                    Calc::Spawned(value) => {
                        let value = value.clone();
                        let task = handle.spawn(async move {
                            tokio::task::yield_now().await;
                            Ok(value)
                        });
                        tasks.lock().unwrap().push(task);
                    }
                },
                triggers,
                move |value| results.lock().unwrap().push(value),
            )
            .unwrap();
    }

    pub fn tick(&mut self, block_time: DateTime<Utc>) {
        self.engine.on_tick(block_time);
    }

    pub fn market_event(&mut self, event_type: EventType) {
        self.engine.new_event(ASSET, MARKET, event_type);
    }

    pub fn end_block(&mut self) {
        self.engine.on_block_end();
    }

    pub fn deliver(&mut self, from: &str, event_id: &EventId, value: &SampleParams) {
        self.deliver_bundle(from, event_id, SampleConverter.to_bundle(value));
    }

    pub fn deliver_bundle(&mut self, from: &str, event_id: &EventId, bundle: KeyValueBundle) {
        self.engine
            .proposed_value_received(&state_var_id(), &NodeId::from(from), event_id, bundle)
            .unwrap();
    }

    pub fn active_event(&self) -> Option<EventId> {
        self.engine
            .state_variable(&state_var_id())
            .and_then(floatvar_core::StateVariable::event_id)
    }

    pub fn state(&self) -> ConsensusState {
        self.engine.state_variable(&state_var_id()).unwrap().state()
    }

    pub fn events(&self) -> Vec<StateVarEvent> {
        self.bus.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<ConsensusState> {
        self.events().into_iter().map(|event| event.state).collect()
    }

    pub fn results(&self) -> Vec<SampleParams> {
        self.results.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<StateValueProposal> {
        self.broadcaster.submitted()
    }

    pub fn take_handles(&self) -> Vec<CalculationHandle<SampleParams>> {
        std::mem::take(&mut *self.handles.lock().unwrap())
    }

    pub async fn join_calculations(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.await.unwrap();
        }
    }
}

/// One node per validator in [`POWERS`], all running the same calculation.
pub fn committee(calc: &Calc, triggers: &[EventType]) -> Vec<Node> {
    POWERS
        .iter()
        .map(|(id, _)| {
            let mut node = Node::new(id, calc.clone());
            node.register(triggers);
            node
        })
        .collect()
}

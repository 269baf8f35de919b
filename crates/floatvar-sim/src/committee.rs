//! In-process stand-ins for the node services around the engine.
//!
//! Every simulated validator shares one [`Mempool`]: its broadcaster drops
//! proposals there and the block loop delivers them to every engine, which
//! is what inclusion in a block does on a real chain.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use floatvar_core::collaborators::SubmitCallback;
use floatvar_core::{Broadcaster, EventBus, Topology};
use floatvar_types::{NodeId, StateValueProposal, StateVarEvent};
use tracing::{debug, info};

/// Proposals waiting for the next block, with their sender.
#[derive(Debug, Default)]
pub struct Mempool {
    queue: Mutex<Vec<(NodeId, StateValueProposal)>>,
}

impl Mempool {
    fn push(&self, sender: NodeId, proposal: StateValueProposal) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((sender, proposal));
    }

    /// Take every queued proposal in arrival order.
    pub fn drain(&self) -> Vec<(NodeId, StateValueProposal)> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A fixed validator set seen from one node.
#[derive(Debug)]
pub struct CommitteeTopology {
    self_id: NodeId,
    powers: Arc<BTreeMap<NodeId, i64>>,
}

impl CommitteeTopology {
    /// The committee as seen by `self_id`.
    pub const fn new(self_id: NodeId, powers: Arc<BTreeMap<NodeId, i64>>) -> Self {
        Self { self_id, powers }
    }
}

impl Topology for CommitteeTopology {
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
        self.powers
            .values()
            .fold(0_i64, |total, power| total.saturating_add(*power))
    }

    fn voting_power(&self, node: &NodeId) -> i64 {
        self.powers.get(node).copied().unwrap_or_default()
    }
}

/// Submits proposals straight into the shared mempool.
#[derive(Debug)]
pub struct LoopbackBroadcaster {
    node: NodeId,
    mempool: Arc<Mempool>,
}

impl LoopbackBroadcaster {
    /// Broadcaster for `node`.
    pub const fn new(node: NodeId, mempool: Arc<Mempool>) -> Self {
        Self { node, mempool }
    }
}

impl Broadcaster for LoopbackBroadcaster {
    fn submit(&self, proposal: StateValueProposal, on_done: SubmitCallback) {
        debug!(
            node = %self.node,
            state_var = %proposal.state_var_id,
            event_id = %proposal.event_id,
            "Proposal queued"
        );
        self.mempool.push(self.node.clone(), proposal);
        on_done(Ok(()));
    }
}

/// Logs every state event of one node.
#[derive(Debug)]
pub struct LoggingBus {
    node: NodeId,
}

impl LoggingBus {
    /// Event bus for `node`.
    pub const fn new(node: NodeId) -> Self {
        Self { node }
    }
}

impl EventBus for LoggingBus {
    fn send(&self, event: StateVarEvent) {
        info!(
            node = %self.node,
            state_var = %event.state_var_id,
            event_id = %event.event_id,
            state = %event.state,
            "State variable event"
        );
    }
}

//! Seams between the consensus engine and the rest of the node.
//!
//! The engine never talks to the network, the validator registry or the
//! event store directly. It goes through these traits, which the hosting
//! node implements and tests replace with recording doubles. All of them
//! are shared across threads: a [`Broadcaster`] completion or a
//! [`CalculationHandle`](crate::calculation::CalculationHandle) may fire
//! from a runtime worker.

use floatvar_types::{NodeId, StateValueProposal, StateVarEvent};

use crate::error::BroadcastError;

/// Completion callback handed to [`Broadcaster::submit`].
pub type SubmitCallback = Box<dyn FnOnce(Result<(), BroadcastError>) + Send>;

/// The validator set and voting power registry.
pub trait Topology: Send + Sync {
    /// Whether this node is a validator.
    fn is_validator(&self) -> bool;

    /// Whether `node` is in the current validator set.
    fn is_validator_node(&self, node: &NodeId) -> bool;

    /// Identifiers of every validator, in no particular order.
    fn all_node_ids(&self) -> Vec<NodeId>;

    /// This node's identifier.
    fn self_node_id(&self) -> NodeId;

    /// Sum of the voting power of every validator.
    fn total_voting_power(&self) -> i64;

    /// Voting power of one validator, zero for unknown nodes.
    fn voting_power(&self, node: &NodeId) -> i64;
}

/// Signs and broadcasts this node's proposals as transactions.
pub trait Broadcaster: Send + Sync {
    /// Submit a proposal.
    ///
    /// `on_done` is invoked exactly once with the outcome, possibly on
    /// another thread and possibly before `submit` returns.
    /// A failure is retried at the start of the next block while the
    /// proposal's event is still active.
    fn submit(&self, proposal: StateValueProposal, on_done: SubmitCallback);
}

/// Publishes lifecycle events to the node's event bus.
pub trait EventBus: Send + Sync {
    /// Publish one event.
    fn send(&self, event: StateVarEvent);

    /// Publish events in order. Defaults to sending them one by one.
    fn send_batch(&self, events: Vec<StateVarEvent>) {
        for event in events {
            self.send(event);
        }
    }
}

//! Shared type definitions for floating-point state-variable consensus.
//!
//! Everything that crosses a boundary between the consensus engine and its
//! collaborators lives here: the numeric value model exchanged between
//! validators, the identifiers that key every map, the lifecycle enums and
//! the events published on the bus. Identifier and enum types flow to
//! `TypeScript` via `ts-rs` for dashboards that render bus events.
//!
//! # Modules
//!
//! - [`value`] -- Scalar / vector / matrix decimal values and tolerance checks
//! - [`bundle`] -- Ordered key/value/tolerance bundles and their wire form
//! - [`ids`] -- String newtypes for state variables, events and nodes
//! - [`enums`] -- Trigger event types and consensus states
//! - [`events`] -- Bus events and the proposal payload

pub mod bundle;
pub mod enums;
pub mod events;
pub mod ids;
pub mod value;

pub use bundle::{KeyValueBundle, KeyValueTol};
pub use enums::{ConsensusState, EventType};
pub use events::{StateValueProposal, StateVarEvent};
pub use ids::{EventId, NodeId, StateVarId};
pub use value::Value;

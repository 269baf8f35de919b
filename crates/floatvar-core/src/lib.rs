//! Floating-point state-variable consensus for a validator committee.
//!
//! Some protocol quantities (risk factors, price-monitoring bounds) come out
//! of numeric computations whose results differ slightly between machines.
//! This crate lets every validator compute such a value locally, exchange
//! its proposal, and adopt a value only once validators holding a quorum of
//! voting power agree on it within a per-key tolerance.
//!
//! # Modules
//!
//! - [`engine`] -- [`Engine`]: registration, event fan-out, time triggers
//!   and the block lifecycle hooks.
//! - [`state_var`] -- [`StateVariable`]: the per-variable agreement state
//!   machine.
//! - [`calculation`] -- [`Converter`] and the [`CalculationHandle`] an owner
//!   completes when its computation finishes.
//! - [`collaborators`] -- [`Topology`], [`Broadcaster`] and [`EventBus`],
//!   the seams to the rest of the node.
//! - [`config`] -- [`StateVarConfig`] loading from YAML.
//! - [`error`] -- Error types returned or logged by the engine.
//!
//! [`Engine`]: engine::Engine
//! [`StateVariable`]: state_var::StateVariable
//! [`Converter`]: calculation::Converter
//! [`CalculationHandle`]: calculation::CalculationHandle
//! [`Topology`]: collaborators::Topology
//! [`Broadcaster`]: collaborators::Broadcaster
//! [`EventBus`]: collaborators::EventBus
//! [`StateVarConfig`]: config::StateVarConfig

pub mod calculation;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod state_var;

pub use calculation::{CalculationHandle, Converter};
pub use collaborators::{Broadcaster, EventBus, Topology};
pub use config::{ConfigError, StateVarConfig};
pub use engine::{Engine, TimeTrigger};
pub use error::{BroadcastError, CalculationError, ConversionError, EngineError};
pub use state_var::{NodeBundle, StateVarInternalState, StateVariable};

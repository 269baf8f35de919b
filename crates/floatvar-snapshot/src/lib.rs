//! Snapshot support for the state-variable consensus engine.
//!
//! A node joining the chain from a snapshot must resume every in-flight
//! agreement exactly where the committee left it. This crate defines the
//! [`StateProvider`] contract shared by every snapshot participant, the
//! [`FloatingPointConsensus`] payload, and [`SnapshotEngine`], which
//! implements the contract for an [`Engine`](floatvar_core::Engine).
//!
//! # Modules
//!
//! - [`provider`] -- The [`StateProvider`] trait, [`Payload`] and
//!   [`SnapshotError`].
//! - [`payload`] -- The serialized form of the engine's state.
//! - [`engine`] -- [`SnapshotEngine`], the two-phase restore.

pub mod engine;
pub mod payload;
pub mod provider;

pub use engine::SnapshotEngine;
pub use payload::{FloatingPointConsensus, KEY, NAMESPACE};
pub use provider::{Payload, SnapshotError, StateProvider};

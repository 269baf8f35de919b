//! Type-safe identifier wrappers around [`String`].
//!
//! Identifiers in the consensus protocol are human-readable strings agreed
//! across validators, so each one is a transparent newtype that orders and
//! hashes like its inner string. Ordering matters: every map keyed by these
//! types is a `BTreeMap` so iteration is identical on every node.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
        )]
        #[serde(transparent)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from anything string-like.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Identifier of a state variable: `asset_market_name`.
    StateVarId
}

define_id! {
    /// Identifier of one calculation round of a state variable.
    ///
    /// Either `asset_market_<32 alphanumerics>` for market events or the
    /// block time formatted `%Y%m%d_%H%M%S` for time triggers.
    EventId
}

define_id! {
    /// Identifier of a node in the validator topology.
    NodeId
}

impl StateVarId {
    /// Build the identifier of variable `name` for a market.
    pub fn from_parts(asset: &str, market: &str, name: &str) -> Self {
        Self(format!("{asset}_{market}_{name}"))
    }

    /// Whether this identifier belongs to the given asset and market.
    pub fn has_prefix(&self, asset: &str, market: &str) -> bool {
        self.0
            .strip_prefix(asset)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_prefix(market))
            .is_some_and(|rest| rest.starts_with('_'))
    }
}

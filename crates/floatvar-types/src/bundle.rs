//! Ordered bundles of keyed values with per-key tolerances.
//!
//! A [`KeyValueBundle`] is the unit a validator proposes for one state
//! variable. Two bundles are only comparable when they carry the same keys
//! in the same order with the same tolerances; the values are then compared
//! pairwise, each against its own tolerance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One named value and the tolerance used when comparing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueTol {
    /// Name of the quantity inside the bundle.
    pub key: String,
    /// The proposed value.
    pub value: Value,
    /// Maximum absolute elementwise difference still considered a match.
    pub tolerance: Decimal,
}

impl KeyValueTol {
    /// Create a keyed value.
    pub fn new(key: impl Into<String>, value: Value, tolerance: Decimal) -> Self {
        Self {
            key: key.into(),
            value,
            tolerance,
        }
    }
}

/// An ordered sequence of [`KeyValueTol`] entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueBundle {
    /// Entries in proposal order.
    pub kvt: Vec<KeyValueTol>,
}

impl KeyValueBundle {
    /// Create an empty bundle.
    pub const fn new() -> Self {
        Self { kvt: Vec::new() }
    }

    /// Builder form of [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value, tolerance: Decimal) -> Self {
        self.push(KeyValueTol::new(key, value, tolerance));
        self
    }

    /// Append an entry.
    pub fn push(&mut self, entry: KeyValueTol) {
        self.kvt.push(entry);
    }

    /// Look up the first entry with the given key.
    pub fn get(&self, key: &str) -> Option<&KeyValueTol> {
        self.kvt.iter().find(|entry| entry.key == key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.kvt.len()
    }

    /// Whether the bundle has no entries.
    pub fn is_empty(&self) -> bool {
        self.kvt.is_empty()
    }

    /// Iterate over the entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, KeyValueTol> {
        self.kvt.iter()
    }

    /// Exact equality of every value, given an identical layout.
    pub fn equals(&self, other: &Self) -> bool {
        self.same_layout(other)
            && self
                .kvt
                .iter()
                .zip(&other.kvt)
                .all(|(a, b)| a.value.equals(&b.value))
    }

    /// Whether every value is within its tolerance of the other bundle's,
    /// given an identical layout.
    pub fn within_tolerance(&self, other: &Self) -> bool {
        self.same_layout(other)
            && self
                .kvt
                .iter()
                .zip(&other.kvt)
                .all(|(a, b)| a.value.within_tolerance(&b.value, a.tolerance))
    }

    /// Encode as JSON bytes with every number as a decimal string.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if encoding fails.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode bytes produced by [`to_wire`](Self::to_wire).
    ///
    /// # Errors
    ///
    /// Returns the deserializer error if the bytes are not a valid bundle.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Same length, same key order and same tolerances.
    fn same_layout(&self, other: &Self) -> bool {
        self.kvt.len() == other.kvt.len()
            && self
                .kvt
                .iter()
                .zip(&other.kvt)
                .all(|(a, b)| a.key == b.key && a.tolerance == b.tolerance)
    }
}

impl<'a> IntoIterator for &'a KeyValueBundle {
    type Item = &'a KeyValueTol;
    type IntoIter = std::slice::Iter<'a, KeyValueTol>;

    fn into_iter(self) -> Self::IntoIter {
        self.kvt.iter()
    }
}

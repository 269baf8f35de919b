//! The contract between the node's snapshot engine and its participants.

/// Errors raised while taking or loading a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The provider has no state under the key.
    #[error("unknown snapshot key {key}")]
    UnknownKey {
        /// The requested key.
        key: String,
    },

    /// The payload belongs to another provider.
    #[error("payload namespace {found} does not match {expected}")]
    WrongNamespace {
        /// This provider's namespace.
        expected: &'static str,
        /// The namespace of the payload.
        found: String,
    },

    /// The payload bytes could not be decoded.
    #[error("failed to decode snapshot payload: {source}")]
    Decode {
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The state could not be encoded.
    #[error("failed to encode snapshot payload: {source}")]
    Encode {
        /// The underlying JSON error.
        source: serde_json::Error,
    },
}

/// One serialized piece of state, addressed by namespace and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// The provider the state belongs to.
    pub namespace: String,
    /// The key within the provider.
    pub key: String,
    /// The serialized state.
    pub data: Vec<u8>,
}

/// A component whose state is part of the node's snapshot.
pub trait StateProvider {
    /// The namespace all of this provider's keys live in.
    fn namespace(&self) -> &'static str;

    /// Every key this provider serves.
    fn keys(&self) -> Vec<String>;

    /// Serialize the state under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnknownKey`] for a key not listed by
    /// [`keys`](Self::keys), or [`SnapshotError::Encode`] if serialization
    /// fails.
    fn get_state(&mut self, key: &str) -> Result<Vec<u8>, SnapshotError>;

    /// Load state from a payload taken by [`get_state`](Self::get_state).
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if the payload is addressed elsewhere or
    /// cannot be decoded.
    fn load_state(&mut self, payload: &Payload) -> Result<(), SnapshotError>;

    /// Called once every provider has loaded its state.
    fn on_state_loaded(&mut self) {}

    /// Whether the provider has stopped taking part in snapshots.
    fn stopped(&self) -> bool;
}

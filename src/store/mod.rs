//! Coordination store contract.
//!
//! The coordination store is the key/value channel through which operators issue
//! commands and components publish status. Keys are dotted paths
//! (`AIRSPYCMDS.set_freq.request`, `components.fft.state`); values are JSON.
//!
//! # Architecture
//!
//! Components only depend on [`CoordinationStore`]. The crate ships
//! [`MemoryStore`], an in-process hierarchical implementation used by the daemon
//! and by tests. A networked store would implement the same trait.
//!
//! Subscription callbacks run synchronously on the thread that performed the
//! `put`. Implementations must not hold internal locks while invoking them, so a
//! callback may itself read from and write to the store.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;

/// Callback invoked with `(key, value)` after a matching write.
pub type StoreCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Handle returned by [`CoordinationStore::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Errors reported by a coordination store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Nothing is stored at or below the key.
    #[error("key '{0}' not found")]
    NotFound(String),

    /// Key is empty or contains an empty path segment.
    #[error("invalid key '{0}'")]
    InvalidKey(String),

    /// The store rejected or could not complete the write.
    #[error("write to '{key}' failed: {reason}")]
    WriteFailed {
        /// Key being written.
        key: String,
        /// Backend-specific cause.
        reason: String,
    },

    /// The subscription was never issued or has already been removed.
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),
}

/// Key/value coordination channel shared by all components.
pub trait CoordinationStore: Send + Sync {
    /// Reads the value at `key`, or the subtree below it as a JSON object.
    fn get(&self, key: &str) -> Result<Value, StoreError>;

    /// Writes a value atomically and notifies matching subscribers.
    fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Registers `callback` for writes to `key` and to any key below it.
    fn subscribe(&self, key: &str, callback: StoreCallback) -> Result<SubscriptionId, StoreError>;

    /// Removes a subscription.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError>;
}

/// Checks that a key is a non-empty dotted path without empty segments.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// True when `key` equals `pattern` or lies below it.
#[must_use]
pub fn key_matches(pattern: &str, key: &str) -> bool {
    key == pattern
        || (key.len() > pattern.len()
            && key.starts_with(pattern)
            && key.as_bytes()[pattern.len()] == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("AIRSPYCMDS.open.request").is_ok());
        assert!(validate_key("single").is_ok());
        assert_eq!(
            validate_key("a..b"),
            Err(StoreError::InvalidKey("a..b".into()))
        );
        assert!(validate_key("").is_err());
        assert!(validate_key("trailing.").is_err());
    }

    #[test]
    fn pattern_matching_respects_segments() {
        assert!(key_matches("components", "components.fft.state"));
        assert!(key_matches("components.fft", "components.fft"));
        assert!(!key_matches("components.ff", "components.fft.state"));
        assert!(!key_matches("components.fft.state", "components.fft"));
    }
}

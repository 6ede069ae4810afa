//! In-process hierarchical coordination store.
//!
//! Values live in a flat ordered map keyed by dotted path. Reading an interior
//! node assembles the subtree below it into a JSON object, so
//! `get("components")` returns `{"fft": {"state": "Running"}, ...}`.
//!
//! When a key holds a value and also has descendants, a subtree read of its
//! parent shows the descendants. The value itself is still returned by a direct
//! `get` of that key.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::{
    key_matches, validate_key, CoordinationStore, StoreCallback, StoreError, SubscriptionId,
};

struct Subscriber {
    id: SubscriptionId,
    pattern: String,
    callback: StoreCallback,
}

/// Thread-safe in-memory [`CoordinationStore`].
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, Value>>,
    subscribers: Mutex<Vec<Subscriber>>,
    write_faults: Mutex<Vec<(String, String)>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
            write_faults: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Makes every subsequent write at or below `prefix` fail with `reason`.
    ///
    /// Used to exercise the paths that treat a lost response as fatal.
    pub fn fail_writes_under(&self, prefix: &str, reason: &str) {
        self.write_faults
            .lock()
            .push((prefix.to_string(), reason.to_string()));
    }

    /// Removes all injected write failures.
    pub fn clear_write_faults(&self) {
        self.write_faults.lock().clear();
    }

    /// All leaf keys currently stored, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn check_write_faults(&self, key: &str) -> Result<(), StoreError> {
        let faults = self.write_faults.lock();
        match faults.iter().find(|(prefix, _)| key_matches(prefix, key)) {
            Some((_, reason)) => Err(StoreError::WriteFailed {
                key: key.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Value, StoreError> {
        validate_key(key)?;
        let values = self.values.read();
        if let Some(value) = values.get(key) {
            return Ok(value.clone());
        }

        let prefix = format!("{key}.");
        let mut subtree = Map::new();
        for (path, value) in values
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
        {
            insert_path(&mut subtree, &path[prefix.len()..], value);
        }

        if subtree.is_empty() {
            Err(StoreError::NotFound(key.to_string()))
        } else {
            Ok(Value::Object(subtree))
        }
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        validate_key(key)?;
        self.check_write_faults(key)?;

        self.values.write().insert(key.to_string(), value.clone());

        let callbacks: Vec<StoreCallback> = self
            .subscribers
            .lock()
            .iter()
            .filter(|sub| key_matches(&sub.pattern, key))
            .map(|sub| sub.callback.clone())
            .collect();

        for callback in callbacks {
            callback(key, &value);
        }
        Ok(())
    }

    fn subscribe(&self, key: &str, callback: StoreCallback) -> Result<SubscriptionId, StoreError> {
        validate_key(key)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push(Subscriber {
            id,
            pattern: key.to_string(),
            callback,
        });
        tracing::trace!(%id, key, "Subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|sub| sub.id != id);
        if subscribers.len() == before {
            return Err(StoreError::UnknownSubscription(id));
        }
        tracing::trace!(%id, "Unsubscribed");
        Ok(())
    }
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: &Value) {
    let mut node = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            // an interior object built from deeper keys takes precedence
            if !matches!(node.get(segment), Some(Value::Object(_))) {
                node.insert(segment.to_string(), value.clone());
            }
            return;
        }
        let entry = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        node = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

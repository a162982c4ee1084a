//! Extended state variables.
//!
//! Shared between the dispatch thread (guards, actions) and do-activities
//! running on worker threads, so every access goes through a lock. Change
//! listeners are notified after the lock is released.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Receives extended state mutations.
pub trait ExtendedStateListener: Send + Sync {
    fn added(&self, _key: &str, _value: &Value) {}
    fn changed(&self, _key: &str, _value: &Value) {}
    fn removed(&self, _key: &str, _value: &Value) {}
}

enum Change {
    Added(String, Value),
    Changed(String, Value),
    Removed(String, Value),
}

/// Key/value store of machine variables.
#[derive(Default)]
pub struct ExtendedState {
    variables: RwLock<BTreeMap<String, Value>>,
    listeners: RwLock<Vec<Arc<dyn ExtendedStateListener>>>,
}

impl ExtendedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.variables.read().get(key).cloned()
    }

    /// Reads a variable and deserializes it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.variables.read().contains_key(key)
    }

    /// Sets a variable, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        let previous = self.variables.write().insert(key.clone(), value.clone());
        let change = if previous.is_some() {
            Change::Changed(key, value)
        } else {
            Change::Added(key, value)
        };
        self.notify(change);
        previous
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.variables.write().remove(key);
        if let Some(value) = &removed {
            self.notify(Change::Removed(key.to_string(), value.clone()));
        }
        removed
    }

    /// Read-modify-write of a single variable under one write lock.
    pub fn update<F>(&self, key: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let (value, existed) = {
            let mut vars = self.variables.write();
            let existed = vars.contains_key(key);
            let value = f(vars.get(key));
            vars.insert(key.to_string(), value.clone());
            (value, existed)
        };
        let change = if existed {
            Change::Changed(key.to_string(), value.clone())
        } else {
            Change::Added(key.to_string(), value.clone())
        };
        self.notify(change);
        value
    }

    /// Copy of all variables.
    pub fn variables(&self) -> BTreeMap<String, Value> {
        self.variables.read().clone()
    }

    /// Replaces all variables without notifying listeners (silent restore).
    pub fn replace(&self, variables: BTreeMap<String, Value>) {
        *self.variables.write() = variables;
    }

    pub fn len(&self) -> usize {
        self.variables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.read().is_empty()
    }

    /// The variables as one JSON object, used by guard expressions.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.variables
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn add_listener(&self, listener: Arc<dyn ExtendedStateListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, change: Change) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            match &change {
                Change::Added(k, v) => listener.added(k, v),
                Change::Changed(k, v) => listener.changed(k, v),
                Change::Removed(k, v) => listener.removed(k, v),
            }
        }
    }
}

impl std::fmt::Debug for ExtendedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedState")
            .field("variables", &*self.variables.read())
            .finish()
    }
}

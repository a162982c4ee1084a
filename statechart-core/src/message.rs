//! Event envelope and dispatch results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Header overriding the TIMEOUT_CANCEL grace period (milliseconds) for
/// do-activities of states entered by the carrying event.
pub const HEADER_DO_ACTION_TIMEOUT: &str = "statechart.do_action_timeout_ms";

/// Header naming the principal handed to the transition authorizer.
pub const HEADER_PRINCIPAL: &str = "statechart.principal";

/// An event plus its headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Event id.
    pub payload: String,
    /// Arbitrary headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Value>,
}

impl Message {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Adds a header, replacing any previous value.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    /// Per-event do-activity timeout override, if present.
    pub fn do_action_timeout_ms(&self) -> Option<u64> {
        self.headers.get(HEADER_DO_ACTION_TIMEOUT).and_then(Value::as_u64)
    }

    pub fn principal(&self) -> Option<&str> {
        self.headers.get(HEADER_PRINCIPAL).and_then(Value::as_str)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.payload)
    }
}

/// Outcome of submitting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventResult {
    /// A transition fired.
    Accepted,
    /// No transition fired, or the event was vetoed.
    Denied,
    /// An active state deferred the event.
    Deferred,
    /// Submitted from inside a dispatch pass; runs after the current pass.
    Queued,
}

impl EventResult {
    /// Returns false only for [`EventResult::Denied`].
    pub fn is_accepted(&self) -> bool {
        !matches!(self, EventResult::Denied)
    }
}

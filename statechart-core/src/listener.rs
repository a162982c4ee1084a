//! State machine listeners.

use crate::action::ActionFailure;
use crate::data::StateId;
use crate::message::Message;
use crate::model::TransitionInfo;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Observer of machine activity. Every callback defaults to a no-op.
///
/// Callbacks run on the dispatching thread while the machine is mid-event;
/// events sent from inside a callback are queued and processed afterwards.
pub trait StateMachineListener: Send + Sync {
    /// The innermost active state of the root region changed.
    fn state_changed(&self, _from: Option<&StateId>, _to: Option<&StateId>) {}

    fn state_entered(&self, _state: &StateId) {}

    fn state_exited(&self, _state: &StateId) {}

    /// A transition fired.
    fn transition(&self, _transition: &TransitionInfo) {}

    fn transition_started(&self, _transition: &TransitionInfo) {}

    fn transition_ended(&self, _transition: &TransitionInfo) {}

    /// The transition authorizer rejected a transition.
    fn transition_denied(&self, _transition: &TransitionInfo) {}

    /// No active state accepted or deferred the event.
    fn event_not_accepted(&self, _message: &Message) {}

    fn extended_state_changed(&self, _key: &str, _value: Option<&Value>) {}

    fn state_machine_started(&self) {}

    fn state_machine_stopped(&self) {}

    /// A user action or do-activity failed.
    fn state_machine_error(&self, _failure: &ActionFailure) {}
}

/// Logs every callback through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl StateMachineListener for LoggingListener {
    fn state_changed(&self, from: Option<&StateId>, to: Option<&StateId>) {
        tracing::info!(
            "State changed: {} -> {}",
            from.map(StateId::as_str).unwrap_or("-"),
            to.map(StateId::as_str).unwrap_or("-")
        );
    }

    fn state_entered(&self, state: &StateId) {
        tracing::debug!("State entered: {}", state);
    }

    fn state_exited(&self, state: &StateId) {
        tracing::debug!("State exited: {}", state);
    }

    fn transition(&self, t: &TransitionInfo) {
        tracing::debug!(
            "Transition {} -> {} on {}",
            t.source,
            t.target,
            t.event.as_deref().unwrap_or("<none>")
        );
    }

    fn transition_denied(&self, t: &TransitionInfo) {
        tracing::warn!("Transition {} -> {} denied", t.source, t.target);
    }

    fn event_not_accepted(&self, message: &Message) {
        tracing::info!("Event not accepted: {}", message.payload);
    }

    fn extended_state_changed(&self, key: &str, value: Option<&Value>) {
        tracing::debug!("Variable {} = {:?}", key, value);
    }

    fn state_machine_started(&self) {
        tracing::info!("State machine started");
    }

    fn state_machine_stopped(&self) {
        tracing::info!("State machine stopped");
    }

    fn state_machine_error(&self, failure: &ActionFailure) {
        tracing::error!("State machine error: {}", failure);
    }
}

/// Registered listeners; notification iterates over a snapshot so callbacks
/// may add or remove listeners.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn StateMachineListener>>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Arc<dyn StateMachineListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn StateMachineListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub(crate) fn notify(&self, f: impl Fn(&dyn StateMachineListener)) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            f(listener.as_ref());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

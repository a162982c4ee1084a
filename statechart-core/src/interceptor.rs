//! Interceptors see every event and transition before and after the
//! machine acts on it, and may veto.

use crate::action::ActionFailure;
use crate::context::StateMachineContext;
use crate::data::StateId;
use crate::message::Message;
use crate::model::TransitionInfo;
use parking_lot::RwLock;
use std::sync::Arc;

pub trait StateMachineInterceptor: Send + Sync {
    /// Returning `false` drops the event before any transition is selected.
    fn pre_event(&self, _message: &Message) -> bool {
        true
    }

    /// Returning `false` rejects the selected transition.
    fn pre_transition(&self, _transition: &TransitionInfo, _message: Option<&Message>) -> bool {
        true
    }

    fn post_transition(&self, _transition: &TransitionInfo, _message: Option<&Message>) {}

    /// Called before the exit phase of a committed transition.
    fn pre_state_change(&self, _target: &StateId, _transition: &TransitionInfo) {}

    /// Called once the machine settled after a committed transition.
    fn post_state_change(&self, _transition: &TransitionInfo, _context: &StateMachineContext) {}

    fn state_machine_error(&self, _failure: &ActionFailure) {}
}

#[derive(Default)]
pub(crate) struct InterceptorSet {
    interceptors: RwLock<Vec<Arc<dyn StateMachineInterceptor>>>,
}

impl InterceptorSet {
    pub(crate) fn add(&self, interceptor: Arc<dyn StateMachineInterceptor>) {
        self.interceptors.write().push(interceptor);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn StateMachineInterceptor>> {
        self.interceptors.read().clone()
    }

    pub(crate) fn pre_event(&self, message: &Message) -> bool {
        self.snapshot().iter().all(|i| i.pre_event(message))
    }

    pub(crate) fn pre_transition(&self, t: &TransitionInfo, message: Option<&Message>) -> bool {
        self.snapshot().iter().all(|i| i.pre_transition(t, message))
    }

    pub(crate) fn post_transition(&self, t: &TransitionInfo, message: Option<&Message>) {
        for i in self.snapshot() {
            i.post_transition(t, message);
        }
    }

    pub(crate) fn pre_state_change(&self, target: &StateId, t: &TransitionInfo) {
        for i in self.snapshot() {
            i.pre_state_change(target, t);
        }
    }

    pub(crate) fn post_state_change(&self, t: &TransitionInfo, context: &StateMachineContext) {
        for i in self.snapshot() {
            i.post_state_change(t, context);
        }
    }

    pub(crate) fn state_machine_error(&self, failure: &ActionFailure) {
        for i in self.snapshot() {
            i.state_machine_error(failure);
        }
    }
}

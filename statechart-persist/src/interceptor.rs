//! Persist on every committed state change.

use crate::persist::StateMachinePersist;
use statechart_core::{StateMachineContext, StateMachineInterceptor, TransitionInfo};
use std::sync::Arc;

/// Writes the settled context after each committed transition.
///
/// Records are keyed by the machine id; machines without an id use the
/// fallback key. A failed write is logged and does not affect the machine.
pub struct PersistingInterceptor {
    persist: Arc<dyn StateMachinePersist>,
    fallback_key: String,
}

impl PersistingInterceptor {
    pub fn new(persist: Arc<dyn StateMachinePersist>, fallback_key: impl Into<String>) -> Self {
        Self {
            persist,
            fallback_key: fallback_key.into(),
        }
    }

    fn key<'a>(&'a self, context: &'a StateMachineContext) -> &'a str {
        context.id.as_deref().unwrap_or(&self.fallback_key)
    }
}

impl StateMachineInterceptor for PersistingInterceptor {
    fn post_state_change(&self, transition: &TransitionInfo, context: &StateMachineContext) {
        let key = self.key(context);
        if let Err(e) = self.persist.write(context, key) {
            tracing::warn!(
                "Failed to persist context under {} after {} -> {}: {}",
                key,
                transition.source,
                transition.target,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::InMemoryStateMachinePersist;
    use statechart_core::{ModelData, StateData, StateMachine, StateMachineConfig, TransitionData};

    fn model() -> statechart_core::Model {
        ModelData::new()
            .state(StateData::new("S1").initial())
            .state(StateData::new("S2"))
            .transition(TransitionData::external("S1", "S2").event("E1"))
            .transition(TransitionData::internal("S2").event("TICK"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_writes_after_state_change() {
        let store = Arc::new(InMemoryStateMachinePersist::new());
        let mut config = StateMachineConfig::default();
        config.machine.id = Some("door-1".into());
        let machine = StateMachine::new(model(), config).unwrap();
        machine.add_interceptor(Arc::new(PersistingInterceptor::new(store.clone(), "default")));

        machine.start();
        assert!(store.is_empty());

        machine.send_event("E1");
        let ctx = store.read("door-1").unwrap().unwrap();
        assert_eq!(ctx.active_ids(), vec!["S2"]);
        assert_eq!(ctx.event.as_deref(), Some("E1"));
    }

    #[test]
    fn test_internal_transition_not_persisted() {
        let store = Arc::new(InMemoryStateMachinePersist::new());
        let machine = StateMachine::new(model(), StateMachineConfig::default()).unwrap();
        machine.add_interceptor(Arc::new(PersistingInterceptor::new(store.clone(), "default")));
        machine.start();
        machine.send_event("E1");
        store.remove("default");

        machine.send_event("TICK");
        assert!(store.is_empty());
    }
}

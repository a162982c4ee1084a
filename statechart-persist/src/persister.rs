//! Persist and restore whole machines by key.

use crate::error::PersistError;
use crate::persist::StateMachinePersist;
use statechart_core::StateMachine;
use std::sync::Arc;

/// Moves machine contexts in and out of a [`StateMachinePersist`] store.
#[derive(Clone)]
pub struct DefaultStateMachinePersister {
    persist: Arc<dyn StateMachinePersist>,
}

impl DefaultStateMachinePersister {
    pub fn new(persist: Arc<dyn StateMachinePersist>) -> Self {
        Self { persist }
    }

    /// Snapshots `machine` and writes it under `key`.
    pub fn persist(&self, machine: &StateMachine, key: &str) -> Result<(), PersistError> {
        let context = machine.snapshot()?;
        self.persist.write(&context, key)?;
        tracing::debug!("Persisted machine {} under {}", machine.uuid(), key);
        Ok(())
    }

    /// Replaces the configuration of `machine` with the context stored
    /// under `key` and starts it. No entry actions run.
    pub fn restore(&self, machine: &StateMachine, key: &str) -> Result<(), PersistError> {
        let context = self
            .persist
            .read(key)?
            .ok_or_else(|| PersistError::NotFound {
                key: key.to_string(),
            })?;
        machine.reset_state_machine(&context)?;
        if !machine.is_running() {
            machine.start();
        }
        tracing::info!(
            "Restored machine {} from {} into {:?}",
            machine.uuid(),
            key,
            context.active_ids()
        );
        Ok(())
    }
}

impl std::fmt::Debug for DefaultStateMachinePersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultStateMachinePersister").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::InMemoryStateMachinePersist;
    use parking_lot::Mutex;
    use statechart_core::{
        Action, ModelData, PseudoStateKind, StateData, StateId, StateMachineConfig,
        StateMachineListener, TransitionData,
    };

    /// Two orthogonal regions joined back into S4.
    fn regions(entered: Arc<Mutex<Vec<String>>>) -> ModelData {
        let log = move |id: &'static str| {
            let entered = entered.clone();
            Action::new(move |_| entered.lock().push(id.to_string()))
        };
        ModelData::new()
            .state(StateData::new("SI").initial())
            .state(StateData::new("S1").kind(PseudoStateKind::Fork))
            .state(StateData::new("S2").entry(log("S2")))
            .state(StateData::new("SF").end())
            .state(StateData::new("S3").kind(PseudoStateKind::Join))
            .state(StateData::new("S4").entry(log("S4")))
            .state(StateData::new("S20").parent("S2").region("R1").initial())
            .state(StateData::new("S21").parent("S2").region("R1").entry(log("S21")))
            .state(StateData::new("S30").parent("S2").region("R2").initial())
            .state(StateData::new("S31").parent("S2").region("R2").entry(log("S31")))
            .transition(TransitionData::external("SI", "S2").event("E1"))
            .transition(TransitionData::external("S20", "S21").event("E2"))
            .transition(TransitionData::external("S30", "S31").event("E3"))
            .transition(TransitionData::external("S3", "S4"))
            .fork("S1", ["S20", "S30"])
            .join("S3", ["S21", "S31"])
    }

    fn machine(id: Option<&str>) -> (StateMachine, Arc<Mutex<Vec<String>>>) {
        let entered = Arc::new(Mutex::new(Vec::new()));
        let mut config = StateMachineConfig::default();
        config.machine.id = id.map(str::to_string);
        let model = regions(entered.clone()).build().unwrap();
        (StateMachine::new(model, config).unwrap(), entered)
    }

    fn ids(machine: &StateMachine) -> Vec<String> {
        machine.state().into_iter().map(|s| s.0).collect()
    }

    fn persister() -> (DefaultStateMachinePersister, Arc<InMemoryStateMachinePersist>) {
        let store = Arc::new(InMemoryStateMachinePersist::new());
        (DefaultStateMachinePersister::new(store.clone()), store)
    }

    #[test]
    fn test_persist_restore_each_step() {
        let (persister, store) = persister();
        let (live, _) = machine(Some("testid"));
        live.start();
        let steps = [
            ("E1", "xxx1", vec!["S2", "S20", "S30"]),
            ("E2", "xxx2", vec!["S2", "S21", "S30"]),
            ("E3", "xxx3", vec!["S4"]),
        ];
        for (event, key, expected) in &steps {
            assert!(live.send_event(*event));
            assert_eq!(&ids(&live), expected);
            persister.persist(&live, key).unwrap();
        }
        assert_eq!(store.keys(), vec!["xxx1", "xxx2", "xxx3"]);

        for (_, key, expected) in &steps {
            let (restored, entered) = machine(None);
            assert_eq!(restored.id(), None);
            persister.restore(&restored, key).unwrap();
            assert!(restored.is_running());
            assert_eq!(restored.id().as_deref(), Some("testid"));
            assert_eq!(&ids(&restored), expected);
            assert!(entered.lock().is_empty());
        }
    }

    #[test]
    fn test_restored_machine_continues() {
        let (persister, _) = persister();
        let (live, _) = machine(Some("testid"));
        live.start();
        live.send_event("E1");
        persister.persist(&live, "xxx1").unwrap();

        let (restored, entered) = machine(None);
        persister.restore(&restored, "xxx1").unwrap();
        restored.send_event("E2");
        assert_eq!(ids(&restored), vec!["S2", "S21", "S30"]);
        restored.send_event("E3");
        assert_eq!(ids(&restored), vec!["S4"]);
        assert_eq!(*entered.lock(), vec!["S21", "S31", "S4"]);
    }

    #[test]
    fn test_restore_twice_into_running_machine() {
        let (persister, _) = persister();
        let (live, _) = machine(Some("testid"));
        live.start();
        live.send_event("E1");
        persister.persist(&live, "xxx1").unwrap();
        live.send_event("E2");
        persister.persist(&live, "xxx2").unwrap();

        let (restored, _) = machine(None);
        persister.restore(&restored, "xxx1").unwrap();
        persister.restore(&restored, "xxx2").unwrap();
        assert_eq!(ids(&restored), vec!["S2", "S21", "S30"]);

        // one region already waits in the join
        restored.send_event("E3");
        assert_eq!(ids(&restored), vec!["S4"]);
    }

    #[test]
    fn test_restore_missing_key() {
        let (persister, _) = persister();
        let (restored, _) = machine(None);
        assert!(matches!(
            persister.restore(&restored, "nope"),
            Err(PersistError::NotFound { .. })
        ));
        assert!(!restored.is_running());
    }

    #[test]
    fn test_restore_rejects_foreign_context() {
        let (persister, store) = persister();
        let mut ctx = statechart_core::StateMachineContext::new(Some(StateId::from("S21")));
        ctx.id = Some("other".into());
        store.write(&ctx, "foreign").unwrap();

        let (restored, _) = machine(None);
        assert!(matches!(
            persister.restore(&restored, "foreign"),
            Err(PersistError::Core(_))
        ));
        assert_eq!(restored.id(), None);
    }

    #[test]
    fn test_restore_notifies_no_entries() {
        #[derive(Default)]
        struct Entered(Mutex<usize>);

        impl StateMachineListener for Entered {
            fn state_entered(&self, _state: &StateId) {
                *self.0.lock() += 1;
            }
        }

        let (persister, _) = persister();
        let (live, _) = machine(Some("testid"));
        live.start();
        live.send_event("E1");
        persister.persist(&live, "xxx1").unwrap();

        let (restored, _) = machine(None);
        let listener = Arc::new(Entered::default());
        restored.add_state_listener(listener.clone());
        persister.restore(&restored, "xxx1").unwrap();
        assert_eq!(*listener.0.lock(), 0);
    }
}

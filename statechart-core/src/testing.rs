//! Helpers shared by the runtime tests.

use crate::action::ActionFailure;
use crate::config::StateMachineConfig;
use crate::data::StateId;
use crate::listener::StateMachineListener;
use crate::machine::StateMachine;
use crate::message::Message;
use crate::model::{Model, TransitionInfo};
use parking_lot::Mutex;
use std::sync::Arc;

/// Records listener callbacks for assertions.
#[derive(Default)]
pub(crate) struct Recorder {
    pub entered: Mutex<Vec<String>>,
    pub exited: Mutex<Vec<String>>,
    pub transitions: Mutex<Vec<String>>,
    pub denied: Mutex<Vec<String>>,
    pub not_accepted: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<ActionFailure>>,
    pub stopped: Mutex<usize>,
}

impl Recorder {
    pub(crate) fn entered(&self) -> Vec<String> {
        self.entered.lock().clone()
    }

    pub(crate) fn exited(&self) -> Vec<String> {
        self.exited.lock().clone()
    }

    pub(crate) fn transitions(&self) -> usize {
        self.transitions.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.entered.lock().clear();
        self.exited.lock().clear();
        self.transitions.lock().clear();
    }
}

impl StateMachineListener for Recorder {
    fn state_entered(&self, state: &StateId) {
        self.entered.lock().push(state.to_string());
    }

    fn state_exited(&self, state: &StateId) {
        self.exited.lock().push(state.to_string());
    }

    fn transition(&self, t: &TransitionInfo) {
        self.transitions
            .lock()
            .push(format!("{}->{}", t.source, t.target));
    }

    fn transition_denied(&self, t: &TransitionInfo) {
        self.denied.lock().push(format!("{}->{}", t.source, t.target));
    }

    fn event_not_accepted(&self, message: &Message) {
        self.not_accepted.lock().push(message.payload.clone());
    }

    fn state_machine_stopped(&self) {
        *self.stopped.lock() += 1;
    }

    fn state_machine_error(&self, failure: &ActionFailure) {
        self.errors.lock().push(failure.clone());
    }
}

pub(crate) fn machine_with(model: Model, config: StateMachineConfig) -> (StateMachine, Arc<Recorder>) {
    let machine = StateMachine::new(model, config).unwrap();
    let recorder = Arc::new(Recorder::default());
    machine.add_state_listener(recorder.clone());
    (machine, recorder)
}

pub(crate) fn machine(model: Model) -> (StateMachine, Arc<Recorder>) {
    machine_with(model, StateMachineConfig::default())
}

pub(crate) fn ids(machine: &StateMachine) -> Vec<String> {
    machine.state().into_iter().map(|s| s.0).collect()
}

/// Polls `f` until it holds or a second passes.
pub(crate) fn wait_until(f: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if f() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    f()
}

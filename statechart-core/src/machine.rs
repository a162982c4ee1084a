//! Public state machine handle.

use crate::config::StateMachineConfig;
use crate::context::StateMachineContext;
use crate::data::StateId;
use crate::dispatcher::{Published, Runtime, Shared, Trigger};
use crate::error::CoreError;
use crate::executor::TaskExecutor;
use crate::extended::{ExtendedState, ExtendedStateListener};
use crate::hooks::{EnsembleHook, TransitionAuthorizer};
use crate::interceptor::{InterceptorSet, StateMachineInterceptor};
use crate::listener::{ListenerSet, StateMachineListener};
use crate::message::{EventResult, Message};
use crate::model::Model;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A running statechart.
///
/// Handles are cheap to clone and may be used from any thread; events are
/// processed one at a time in the calling thread. An event sent from inside
/// a listener, action or guard is queued and processed once the current
/// event has run to completion.
#[derive(Clone)]
pub struct StateMachine {
    shared: Arc<Shared>,
    uuid: Uuid,
}

impl StateMachine {
    /// Creates a stopped machine with its own task runtime.
    pub fn new(model: impl Into<Arc<Model>>, config: StateMachineConfig) -> Result<Self, CoreError> {
        let executor = Arc::new(TaskExecutor::new(&config.executor)?);
        Ok(Self::with_executor(model, config, executor))
    }

    /// Creates a stopped machine that schedules timers and do-activities on
    /// `executor`.
    pub fn with_executor(
        model: impl Into<Arc<Model>>,
        config: StateMachineConfig,
        executor: Arc<TaskExecutor>,
    ) -> Self {
        let model = model.into();
        let listeners = Arc::new(ListenerSet::default());
        let extended_state = Arc::new(ExtendedState::new());
        extended_state.add_listener(Arc::new(ExtendedStateBridge(listeners.clone())));

        let runtime = Runtime::new(&model, config.machine.id.clone());
        let published = Published {
            machine_id: config.machine.id.clone(),
            ..Published::default()
        };
        let shared = Arc::new(Shared {
            model,
            config,
            executor,
            extended_state,
            listeners,
            interceptors: InterceptorSet::default(),
            authorizer: RwLock::new(None),
            ensemble: RwLock::new(None),
            runtime: Mutex::new(runtime),
            queue: Mutex::new(VecDeque::new()),
            dispatcher: Mutex::new(None),
            published: RwLock::new(published),
            error: AtomicBool::new(false),
        });
        Self {
            shared,
            uuid: Uuid::new_v4(),
        }
    }

    pub fn id(&self) -> Option<String> {
        self.shared.published.read().machine_id.clone()
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn model(&self) -> &Model {
        &self.shared.model
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.shared.config
    }

    /// Enters the initial configuration, or the restored one.
    pub fn start(&self) {
        if self.shared.is_dispatching() {
            self.shared.enqueue(Trigger::Start);
            return;
        }
        self.shared.run(|pass| pass.start());
    }

    /// Exits every active state, innermost first.
    pub fn stop(&self) {
        if self.shared.is_dispatching() {
            self.shared.enqueue(Trigger::Stop);
            return;
        }
        self.shared.run(|pass| pass.stop());
    }

    /// Sends an event and reports whether it was accepted. Deferred and
    /// queued events count as accepted.
    pub fn send_event(&self, message: impl Into<Message>) -> bool {
        self.send(message).is_accepted()
    }

    pub fn send(&self, message: impl Into<Message>) -> EventResult {
        let message = message.into();
        if self.shared.is_dispatching() {
            tracing::trace!("Queueing event {} raised during dispatch", message.payload);
            self.shared.enqueue(Trigger::Event(message));
            return EventResult::Queued;
        }
        self.shared.run(|pass| pass.process_event(message))
    }

    /// Active state ids, outer states before the states nested in them.
    pub fn state(&self) -> Vec<StateId> {
        self.shared.published.read().states.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.published.read().running
    }

    /// Whether the root region reached an end state.
    pub fn is_complete(&self) -> bool {
        self.shared.published.read().complete
    }

    pub fn extended_state(&self) -> &ExtendedState {
        &self.shared.extended_state
    }

    /// Whether any action or do-activity has failed.
    pub fn has_state_machine_error(&self) -> bool {
        self.shared.error.load(Ordering::SeqCst)
    }

    pub fn add_state_listener(&self, listener: Arc<dyn StateMachineListener>) {
        self.shared.listeners.add(listener);
    }

    pub fn remove_state_listener(&self, listener: &Arc<dyn StateMachineListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn StateMachineInterceptor>) {
        self.shared.interceptors.add(interceptor);
    }

    pub fn set_authorizer(&self, authorizer: Arc<dyn TransitionAuthorizer>) {
        *self.shared.authorizer.write() = Some(authorizer);
    }

    pub fn set_ensemble(&self, ensemble: Arc<dyn EnsembleHook>) {
        *self.shared.ensemble.write() = Some(ensemble);
    }

    /// Captures the current configuration.
    pub fn snapshot(&self) -> Result<StateMachineContext, CoreError> {
        if self.shared.is_dispatching() {
            return Err(CoreError::Reentrant {
                operation: "snapshot",
            });
        }
        Ok(self.shared.run(|pass| pass.snapshot()))
    }

    /// Silently replaces the configuration, variables and history with
    /// `context`. No entry actions run. A stopped machine starts from the
    /// restored configuration on its next [`start`](Self::start).
    pub fn reset_state_machine(&self, context: &StateMachineContext) -> Result<(), CoreError> {
        if self.shared.is_dispatching() {
            return Err(CoreError::Reentrant {
                operation: "reset_state_machine",
            });
        }
        self.shared.run(|pass| pass.reset(context))
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let published = self.shared.published.read();
        f.debug_struct("StateMachine")
            .field("id", &published.machine_id)
            .field("uuid", &self.uuid)
            .field("states", &published.states)
            .field("running", &published.running)
            .finish()
    }
}

/// Forwards extended state changes to machine listeners.
struct ExtendedStateBridge(Arc<ListenerSet>);

impl ExtendedStateListener for ExtendedStateBridge {
    fn added(&self, key: &str, value: &Value) {
        self.0.notify(|l| l.extended_state_changed(key, Some(value)));
    }

    fn changed(&self, key: &str, value: &Value) {
        self.0.notify(|l| l.extended_state_changed(key, Some(value)));
    }

    fn removed(&self, key: &str, _value: &Value) {
        self.0.notify(|l| l.extended_state_changed(key, None));
    }
}

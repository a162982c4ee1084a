//! Run-to-completion event dispatch.
//!
//! All configuration changes happen inside a [`Pass`], which holds the
//! runtime lock for the duration of one external call. Events, timer ticks
//! and lifecycle requests raised while a pass is running (from listeners,
//! actions or timer tasks) go through the trigger queue, which the pass
//! drains before it releases the lock.

use crate::action::{ActionExecutor, ActionFailure, Stage, StateContext};
use crate::activity::RunningActivity;
use crate::config::StateMachineConfig;
use crate::context::StateMachineContext;
use crate::data::{PseudoStateKind, StateId};
use crate::error::CoreError;
use crate::executor::TaskExecutor;
use crate::extended::ExtendedState;
use crate::hooks::{EnsembleHook, TransitionAuthorizer};
use crate::interceptor::InterceptorSet;
use crate::listener::ListenerSet;
use crate::message::{EventResult, Message};
use crate::model::{Model, RegionIdx, StateIdx, TransitionIdx};
use crate::timer::{TimerFire, TimerScheduler};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

pub(crate) enum Trigger {
    Event(Message),
    Timer {
        transition: TransitionIdx,
        generation: u64,
    },
    Start,
    Stop,
}

/// Outcome of trying to fire a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Fired,
    Denied,
    NotAccepted,
}

/// Lock-free view of the configuration, updated after every commit.
#[derive(Debug, Default)]
pub(crate) struct Published {
    pub states: Vec<StateId>,
    pub machine_id: Option<String>,
    pub running: bool,
    pub complete: bool,
}

/// Mutable machine state, only touched inside a pass.
pub(crate) struct Runtime {
    pub machine_id: Option<String>,
    /// Active child per region.
    pub active: Vec<Option<StateIdx>>,
    /// Last exited child per region.
    pub history: HashMap<RegionIdx, StateIdx>,
    pub deferred: VecDeque<Message>,
    pub activities: HashMap<StateIdx, Vec<RunningActivity>>,
    pub timers: TimerScheduler,
    pub last_message: Option<Message>,
    pub running: bool,
    pub completed: bool,
    /// A context was restored while stopped; the next start is silent.
    pub restored: bool,
}

impl Runtime {
    pub(crate) fn new(model: &Model, machine_id: Option<String>) -> Self {
        Self {
            machine_id,
            active: vec![None; model.regions.len()],
            history: HashMap::new(),
            deferred: VecDeque::new(),
            activities: HashMap::new(),
            timers: TimerScheduler::new(),
            last_message: None,
            running: false,
            completed: false,
            restored: false,
        }
    }

    pub(crate) fn is_active(&self, model: &Model, s: StateIdx) -> bool {
        self.active[model.states[s].region] == Some(s)
    }

    /// Active states, outer states before the states nested in them.
    pub(crate) fn active_states(&self, model: &Model) -> Vec<StateIdx> {
        let mut out = Vec::new();
        let mut stack = vec![model.root];
        while let Some(r) = stack.pop() {
            if let Some(s) = self.active[r] {
                out.push(s);
                stack.extend(model.states[s].regions.iter().rev());
            }
        }
        out
    }

    fn cancel_activities(&mut self) {
        for (_, running) in self.activities.drain() {
            for activity in running {
                activity.cancel();
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.cancel_activities();
    }
}

/// State shared between machine handles, timer tasks and activities.
pub(crate) struct Shared {
    pub model: Arc<Model>,
    pub config: StateMachineConfig,
    pub executor: Arc<TaskExecutor>,
    pub extended_state: Arc<ExtendedState>,
    pub listeners: Arc<ListenerSet>,
    pub interceptors: InterceptorSet,
    pub authorizer: RwLock<Option<Arc<dyn TransitionAuthorizer>>>,
    pub ensemble: RwLock<Option<Arc<dyn EnsembleHook>>>,
    pub runtime: Mutex<Runtime>,
    pub queue: Mutex<VecDeque<Trigger>>,
    pub dispatcher: Mutex<Option<ThreadId>>,
    pub published: RwLock<Published>,
    pub error: AtomicBool,
}

impl Shared {
    /// Whether the current thread is running a pass.
    pub(crate) fn is_dispatching(&self) -> bool {
        *self.dispatcher.lock() == Some(thread::current().id())
    }

    pub(crate) fn enqueue(&self, trigger: Trigger) {
        self.queue.lock().push_back(trigger);
    }

    /// Runs `f` inside a pass, then drains the trigger queue.
    pub(crate) fn run<R>(self: &Arc<Self>, f: impl FnOnce(&mut Pass<'_>) -> R) -> R {
        let mut rt = self.runtime.lock();
        *self.dispatcher.lock() = Some(thread::current().id());
        let _guard = DispatchGuard(self);
        let mut pass = Pass::new(self, &mut rt);
        let result = f(&mut pass);
        pass.drain();
        result
    }

    /// Processes queued triggers on the blocking pool.
    fn schedule_drain(self: &Arc<Self>) {
        let shared = self.clone();
        self.executor.spawn_blocking(move || shared.run(|_| ()));
    }

    pub(crate) fn report_failure(&self, failure: &ActionFailure) {
        self.error.store(true, Ordering::SeqCst);
        self.listeners.notify(|l| l.state_machine_error(failure));
        self.interceptors.state_machine_error(failure);
    }
}

struct DispatchGuard<'a>(&'a Shared);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        *self.0.dispatcher.lock() = None;
    }
}

/// One exclusive run over the runtime.
pub(crate) struct Pass<'a> {
    pub(crate) shared: &'a Arc<Shared>,
    pub(crate) model: &'a Model,
    pub(crate) rt: &'a mut Runtime,
    /// Message driving the current transition, `None` for triggerless and
    /// timer transitions.
    pub(crate) message: Option<Message>,
    /// Set whenever a state exits; deferred events are retried after it.
    pub(crate) exited_any: bool,
    /// Real state the current transition resolved to.
    pub(crate) landed: Option<StateIdx>,
}

impl<'a> Pass<'a> {
    fn new(shared: &'a Arc<Shared>, rt: &'a mut Runtime) -> Self {
        Self {
            shared,
            model: &shared.model,
            rt,
            message: None,
            exited_any: false,
            landed: None,
        }
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    pub(crate) fn drain(&mut self) {
        loop {
            let next = self.shared.queue.lock().pop_front();
            let Some(trigger) = next else {
                break;
            };
            match trigger {
                Trigger::Event(message) => {
                    self.process_event(message);
                }
                Trigger::Timer {
                    transition,
                    generation,
                } => self.process_timer(transition, generation),
                Trigger::Start => self.start(),
                Trigger::Stop => self.stop(),
            }
        }
    }

    pub(crate) fn process_event(&mut self, message: Message) -> EventResult {
        if !self.rt.running {
            tracing::debug!("Event {} ignored, state machine not running", message.payload);
            self.shared
                .listeners
                .notify(|l| l.event_not_accepted(&message));
            return EventResult::Denied;
        }

        let ensemble = self.shared.ensemble.read().clone();
        if let Some(ensemble) = ensemble {
            if !ensemble.is_leader(&message) {
                tracing::debug!("Event {} dropped, not the ensemble leader", message.payload);
                return EventResult::Denied;
            }
        }

        if !self.shared.interceptors.pre_event(&message) {
            tracing::debug!("Event {} vetoed by interceptor", message.payload);
            return EventResult::Denied;
        }

        tracing::debug!("Processing event {}", message.payload);
        self.message = Some(message.clone());
        match self.resolve(Some(&message.payload)) {
            Outcome::Fired => {
                self.settle();
                EventResult::Accepted
            }
            Outcome::Denied => EventResult::Denied,
            Outcome::NotAccepted if self.is_deferred(&message.payload) => {
                tracing::debug!("Deferring event {}", message.payload);
                self.rt.deferred.push_back(message);
                EventResult::Deferred
            }
            Outcome::NotAccepted => {
                tracing::debug!("Event {} not accepted", message.payload);
                self.shared
                    .listeners
                    .notify(|l| l.event_not_accepted(&message));
                EventResult::Denied
            }
        }
    }

    fn process_timer(&mut self, t: TransitionIdx, generation: u64) {
        if !self.rt.running || !self.rt.timers.is_current(t, generation) {
            tracing::trace!("Dropping stale timer tick for transition {}", t);
            return;
        }
        let transition = &self.model.transitions[t];
        if !self.rt.is_active(self.model, transition.source) {
            return;
        }
        self.message = None;
        if !self.guard_passes(t) {
            return;
        }
        if self.fire(t, None) == Outcome::Fired {
            self.settle();
        }
    }

    fn is_deferred(&self, event: &str) -> bool {
        self.rt
            .active_states(self.model)
            .into_iter()
            .any(|s| self.model.states[s].deferred.contains(event))
    }

    // =========================================================================
    // Run to completion
    // =========================================================================

    /// Runs triggerless transitions and deferred retries until neither
    /// makes progress, then publishes the configuration.
    fn settle(&mut self) {
        loop {
            self.cascade();
            if !self.retry_deferred() {
                break;
            }
        }
        self.publish();
    }

    fn cascade(&mut self) {
        let max_steps = self.shared.config.machine.max_cascade_steps;
        let mut steps = 0;
        loop {
            self.check_completion();
            if !self.rt.running {
                break;
            }
            if steps >= max_steps {
                tracing::warn!("Triggerless cascade stopped after {} steps", steps);
                break;
            }
            self.message = None;
            let outcome = match self.fire_join() {
                Outcome::Fired => Outcome::Fired,
                _ => self.resolve(None),
            };
            if outcome != Outcome::Fired {
                break;
            }
            steps += 1;
        }
    }

    /// Fires the first eligible join whose outgoing guard passes.
    fn fire_join(&mut self) -> Outcome {
        let model = self.model;
        for join in &model.joins {
            let converged = join
                .sources
                .iter()
                .all(|s| self.rt.is_active(model, *s));
            if !converged {
                continue;
            }
            for t in &model.states[join.join].outgoing {
                if !self.guard_passes(*t) {
                    continue;
                }
                let target = model.transitions[*t].target;
                tracing::debug!("Join {} converged", model.states[join.join].id);
                return self.fire(*t, Some(model.lca_region(join.owner, target)));
            }
        }
        Outcome::NotAccepted
    }

    /// Retries deferred events once some state has exited. An event stays
    /// deferred until a transition fires for it.
    fn retry_deferred(&mut self) -> bool {
        if !self.exited_any || self.rt.deferred.is_empty() {
            return false;
        }
        self.exited_any = false;

        let pending = std::mem::take(&mut self.rt.deferred);
        let mut fired = false;
        for message in pending {
            if !self.rt.running {
                self.rt.deferred.push_back(message);
                continue;
            }
            self.message = Some(message.clone());
            if self.resolve(Some(&message.payload)) == Outcome::Fired {
                tracing::debug!("Deferred event {} fired", message.payload);
                self.cascade();
                fired = true;
            } else {
                self.rt.deferred.push_back(message);
            }
        }
        fired
    }

    fn check_completion(&mut self) {
        if self.rt.completed || !self.rt.running {
            return;
        }
        let Some(root) = self.rt.active[self.model.root] else {
            return;
        };
        if self.model.states[root].kind != Some(PseudoStateKind::End) {
            return;
        }
        tracing::info!("State machine completed in {}", self.model.states[root].id);
        self.rt.completed = true;
        self.rt.running = false;
        self.rt.timers.cancel_all();
        self.rt.cancel_activities();
        self.rt.deferred.clear();
        self.publish();
        self.shared.listeners.notify(|l| l.state_machine_stopped());
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub(crate) fn start(&mut self) {
        if self.rt.running {
            return;
        }
        self.rt.running = true;
        self.rt.completed = false;
        self.exited_any = false;
        self.shared.listeners.notify(|l| l.state_machine_started());

        if std::mem::take(&mut self.rt.restored) {
            tracing::debug!("Starting from restored context");
            self.resume();
            self.check_completion();
            self.publish();
            return;
        }

        self.message = None;
        self.rt.active.iter_mut().for_each(|slot| *slot = None);
        self.default_enter(self.model.root);
        let to = self.rt.active[self.model.root].map(|s| &self.model.states[s].id);
        self.shared.listeners.notify(|l| l.state_changed(None, to));
        self.settle();
    }

    pub(crate) fn stop(&mut self) {
        if !self.rt.running {
            return;
        }
        self.message = None;
        self.exit_region(self.model.root);
        self.rt.running = false;
        self.rt.deferred.clear();
        self.rt.timers.cancel_all();
        self.publish();
        self.shared.listeners.notify(|l| l.state_machine_stopped());
    }

    /// Restarts timers (and do-activities, if configured) of every active
    /// state without running entry actions.
    fn resume(&mut self) {
        let resume_activities = self.shared.config.activity.resume_on_restore;
        for s in self.rt.active_states(self.model) {
            self.start_timers(s);
            if resume_activities {
                self.start_activities(s);
            }
        }
    }

    /// Silently replaces the configuration with `ctx`.
    pub(crate) fn reset(&mut self, ctx: &StateMachineContext) -> Result<(), CoreError> {
        let model = self.model;
        let mut active = vec![None; model.regions.len()];
        if ctx.state.is_some() {
            self.restore_region(model.root, ctx, &mut active)?;
        }

        let mut history = HashMap::new();
        for (key, id) in &ctx.history_states {
            let r = model
                .region_by_key(key)
                .ok_or_else(|| CoreError::context(format!("unknown region '{}'", key)))?;
            let s = model
                .index_of(id)
                .ok_or_else(|| CoreError::context(format!("unknown state '{}'", id)))?;
            if model.states[s].region != r {
                return Err(CoreError::context(format!(
                    "history state '{}' is not in region '{}'",
                    id, key
                )));
            }
            history.insert(r, s);
        }

        self.rt.timers.cancel_all();
        self.rt.cancel_activities();
        self.rt.active = active;
        self.rt.history = history;
        self.rt.deferred.clear();
        self.rt.completed = false;
        if ctx.id.is_some() {
            self.rt.machine_id = ctx.id.clone();
        }
        self.rt.last_message = ctx.event.as_ref().map(|event| Message {
            payload: event.clone(),
            headers: ctx.event_headers.clone(),
        });
        self.shared
            .extended_state
            .replace(ctx.extended_state.clone());

        if self.rt.running {
            self.resume();
            self.check_completion();
        } else {
            self.rt.restored = ctx.state.is_some();
        }
        tracing::debug!("Reset state machine to {:?}", ctx.active_ids());
        self.publish();
        Ok(())
    }

    fn restore_region(
        &self,
        r: RegionIdx,
        ctx: &StateMachineContext,
        active: &mut [Option<StateIdx>],
    ) -> Result<(), CoreError> {
        let model = self.model;
        let Some(id) = &ctx.state else {
            self.fill_initial(r, active);
            return Ok(());
        };
        let s = model
            .index_of(id)
            .ok_or_else(|| CoreError::context(format!("unknown state '{}'", id)))?;
        if model.states[s].region != r {
            return Err(CoreError::context(format!(
                "state '{}' is not in region '{}'",
                id,
                model.region_key(r)
            )));
        }
        if model.is_transient(s) {
            return Err(CoreError::context(format!(
                "pseudostate '{}' cannot be active",
                id
            )));
        }
        active[r] = Some(s);

        for (i, child_region) in model.states[s].regions.iter().enumerate() {
            let child = if ctx.child_refs.is_empty() {
                ctx.childs.get(i)
            } else {
                let key = model.region_key(*child_region);
                ctx.child_refs
                    .iter()
                    .position(|k| *k == key)
                    .and_then(|p| ctx.childs.get(p))
            };
            match child {
                Some(child) => self.restore_region(*child_region, child, active)?,
                None => self.fill_initial(*child_region, active),
            }
        }
        Ok(())
    }

    fn fill_initial(&self, r: RegionIdx, active: &mut [Option<StateIdx>]) {
        let s = self.model.regions[r].initial;
        active[r] = Some(s);
        for child in &self.model.states[s].regions {
            self.fill_initial(*child, active);
        }
    }

    // =========================================================================
    // Shared plumbing
    // =========================================================================

    pub(crate) fn publish(&self) {
        let states = self
            .rt
            .active_states(self.model)
            .into_iter()
            .map(|s| self.model.states[s].id.clone())
            .collect();
        let mut published = self.shared.published.write();
        published.states = states;
        published.machine_id = self.rt.machine_id.clone();
        published.running = self.rt.running;
        published.complete = self.rt.completed;
    }

    pub(crate) fn snapshot(&self) -> StateMachineContext {
        StateMachineContext::capture(self.model, self.rt, &self.shared.extended_state)
    }

    pub(crate) fn state_context<'c>(
        &'c self,
        stage: Stage,
        source: Option<&'c StateId>,
        target: Option<&'c StateId>,
        state: Option<&'c StateId>,
    ) -> StateContext<'c> {
        StateContext {
            stage,
            machine_id: self.rt.machine_id.as_deref(),
            message: self.message.as_ref(),
            source,
            target,
            state,
            extended_state: &self.shared.extended_state,
        }
    }

    pub(crate) fn guard_passes(&self, t: TransitionIdx) -> bool {
        let transition = &self.model.transitions[t];
        let ctx = self.state_context(
            Stage::Guard,
            Some(&transition.info.source),
            Some(&transition.info.target),
            None,
        );
        self.guard_outcome(ActionExecutor::evaluate(transition.guard.as_ref(), &ctx))
    }

    /// Reports a failed guard and treats it as denied.
    pub(crate) fn guard_outcome(&self, outcome: Result<bool, ActionFailure>) -> bool {
        outcome.unwrap_or_else(|failure| {
            self.shared.report_failure(&failure);
            false
        })
    }

    pub(crate) fn report(&self, failures: Vec<ActionFailure>) {
        for failure in &failures {
            self.shared.report_failure(failure);
        }
    }

    /// Tick callback for timer tasks; holds the machine weakly.
    pub(crate) fn timer_fire(&self) -> TimerFire {
        let weak: Weak<Shared> = Arc::downgrade(self.shared);
        Arc::new(move |transition, generation| match weak.upgrade() {
            Some(shared) => {
                shared.enqueue(Trigger::Timer {
                    transition,
                    generation,
                });
                shared.schedule_drain();
                true
            }
            None => false,
        })
    }

    pub(crate) fn activity_failure_sink(&self) -> Arc<dyn Fn(ActionFailure) + Send + Sync> {
        let weak: Weak<Shared> = Arc::downgrade(self.shared);
        Arc::new(move |failure| {
            if let Some(shared) = weak.upgrade() {
                shared.report_failure(&failure);
            }
        })
    }
}

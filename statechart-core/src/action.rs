//! Actions, guards and their execution.
//!
//! User code is isolated: an `Err` or a panic from an action is turned into
//! an [`ActionFailure`] for listeners, and a failing guard evaluates to
//! `false`. Neither reaches the caller of `send_event`.

use crate::activity::ActivityContext;
use crate::data::StateId;
use crate::error::{ActionError, CoreError};
use crate::extended::ExtendedState;
use crate::guard::GuardExpr;
use crate::message::Message;
use serde_json::{json, Value};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

type ActionFn = dyn Fn(&StateContext<'_>) -> Result<(), ActionError> + Send + Sync;
type GuardFn = dyn Fn(&StateContext<'_>) -> Result<bool, ActionError> + Send + Sync;
type ActivityFn = dyn Fn(&ActivityContext) -> Result<(), ActionError> + Send + Sync;

/// Where in the transition pipeline user code is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    StateEntry,
    StateExit,
    StateDo,
    InitialAction,
    Transition,
    Guard,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::StateEntry => "state_entry",
            Stage::StateExit => "state_exit",
            Stage::StateDo => "state_do",
            Stage::InitialAction => "initial_action",
            Stage::Transition => "transition",
            Stage::Guard => "guard",
        };
        f.write_str(name)
    }
}

/// View handed to actions and guards.
pub struct StateContext<'a> {
    pub(crate) stage: Stage,
    pub(crate) machine_id: Option<&'a str>,
    pub(crate) message: Option<&'a Message>,
    pub(crate) source: Option<&'a StateId>,
    pub(crate) target: Option<&'a StateId>,
    pub(crate) state: Option<&'a StateId>,
    pub(crate) extended_state: &'a ExtendedState,
}

impl<'a> StateContext<'a> {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn machine_id(&self) -> Option<&str> {
        self.machine_id
    }

    /// Event id, `None` for triggerless and timer transitions.
    pub fn event(&self) -> Option<&str> {
        self.message.map(|m| m.payload.as_str())
    }

    pub fn message(&self) -> Option<&Message> {
        self.message
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.message.and_then(|m| m.header(key))
    }

    pub fn source(&self) -> Option<&StateId> {
        self.source
    }

    pub fn target(&self) -> Option<&StateId> {
        self.target
    }

    /// The state being entered or exited, for state actions.
    pub fn state(&self) -> Option<&StateId> {
        self.state
    }

    pub fn extended_state(&self) -> &ExtendedState {
        self.extended_state
    }

    fn with_stage(&self, stage: Stage) -> StateContext<'a> {
        StateContext {
            stage,
            machine_id: self.machine_id,
            message: self.message,
            source: self.source,
            target: self.target,
            state: self.state,
            extended_state: self.extended_state,
        }
    }

    fn guard_root(&self) -> Value {
        let headers = self
            .message
            .map(|m| serde_json::to_value(&m.headers).unwrap_or(Value::Null))
            .unwrap_or_else(|| json!({}));
        json!({
            "vars": self.extended_state.to_value(),
            "headers": headers,
            "event": self.event(),
        })
    }
}

/// A failed action together with where it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    pub stage: Stage,
    pub state: Option<StateId>,
    pub source: Option<StateId>,
    pub target: Option<StateId>,
    pub event: Option<String>,
    pub error: ActionError,
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.stage)?;
        if let Some(state) = &self.state {
            write!(f, "of {} ", state)?;
        }
        if let (Some(source), Some(target)) = (&self.source, &self.target) {
            write!(f, "({} -> {}) ", source, target)?;
        }
        if let Some(event) = &self.event {
            write!(f, "on {} ", event)?;
        }
        write!(f, "failed: {}", self.error)
    }
}

/// A transition, entry, exit or initial action.
#[derive(Clone)]
pub struct Action(Arc<ActionFn>);

impl Action {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&StateContext<'_>) + Send + Sync + 'static,
    {
        Self(Arc::new(move |ctx| {
            f(ctx);
            Ok(())
        }))
    }

    pub fn fallible<F, E>(f: F) -> Self
    where
        F: Fn(&StateContext<'_>) -> Result<(), E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        Self(Arc::new(move |ctx| {
            f(ctx).map_err(|e| ActionError::failed(e.to_string()))
        }))
    }

    /// Stores `value` under `key` in the extended state.
    pub fn set_variable(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        Self::new(move |ctx| {
            ctx.extended_state().insert(key.clone(), value.clone());
        })
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action")
    }
}

#[derive(Clone)]
enum GuardKind {
    Fn(Arc<GuardFn>),
    Expr(GuardExpr),
}

/// Transition or branch guard.
#[derive(Clone)]
pub struct Guard(GuardKind);

impl Guard {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&StateContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self(GuardKind::Fn(Arc::new(move |ctx| Ok(f(ctx)))))
    }

    pub fn fallible<F, E>(f: F) -> Self
    where
        F: Fn(&StateContext<'_>) -> Result<bool, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        Self(GuardKind::Fn(Arc::new(move |ctx| {
            f(ctx).map_err(|e| ActionError::failed(e.to_string()))
        })))
    }

    /// Parses a guard expression, see [`crate::guard`].
    pub fn expression(expr: &str) -> Result<Self, CoreError> {
        Ok(Self(GuardKind::Expr(GuardExpr::parse(expr)?)))
    }

    pub fn always(value: bool) -> Self {
        Self::new(move |_| value)
    }

    fn evaluate(&self, ctx: &StateContext<'_>) -> Result<bool, ActionError> {
        match &self.0 {
            GuardKind::Fn(f) => f(ctx),
            GuardKind::Expr(expr) => Ok(expr.evaluate(&ctx.guard_root())),
        }
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            GuardKind::Fn(_) => f.write_str("Guard(fn)"),
            GuardKind::Expr(expr) => write!(f, "Guard({:?})", expr),
        }
    }
}

/// Long-running work bound to state occupancy.
///
/// Runs on the blocking worker pool and is expected to poll
/// [`ActivityContext::is_cancelled`] (or sleep through
/// [`ActivityContext::sleep`]) so that exit cancellation is observed.
#[derive(Clone)]
pub struct DoActivity(Arc<ActivityFn>);

impl DoActivity {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ActivityContext) + Send + Sync + 'static,
    {
        Self(Arc::new(move |ctx| {
            f(ctx);
            Ok(())
        }))
    }

    pub fn fallible<F, E>(f: F) -> Self
    where
        F: Fn(&ActivityContext) -> Result<(), E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        Self(Arc::new(move |ctx| {
            f(ctx).map_err(|e| ActionError::failed(e.to_string()))
        }))
    }

    pub(crate) fn run(&self, ctx: &ActivityContext) -> Result<(), ActionError> {
        catch(|| (self.0)(ctx))
    }
}

fn catch<T>(f: impl FnOnce() -> Result<T, ActionError>) -> Result<T, ActionError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(ActionError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn failure(ctx: &StateContext<'_>, error: ActionError) -> ActionFailure {
    ActionFailure {
        stage: ctx.stage,
        state: ctx.state.cloned(),
        source: ctx.source.cloned(),
        target: ctx.target.cloned(),
        event: ctx.event().map(str::to_string),
        error,
    }
}

/// Runs actions and guards with failure isolation.
pub(crate) struct ActionExecutor;

impl ActionExecutor {
    /// Runs every action in order. A failure does not stop the remaining
    /// actions and nothing already done is rolled back.
    pub(crate) fn execute(actions: &[Action], ctx: &StateContext<'_>) -> Vec<ActionFailure> {
        actions
            .iter()
            .filter_map(|action| match catch(|| (action.0)(ctx)) {
                Ok(()) => None,
                Err(error) => {
                    tracing::error!("{} action failed: {}", ctx.stage, error);
                    Some(failure(ctx, error))
                }
            })
            .collect()
    }

    /// A missing guard passes. A failing guard comes back as `Err` and
    /// the caller treats it as denied after reporting it.
    pub(crate) fn evaluate(
        guard: Option<&Guard>,
        ctx: &StateContext<'_>,
    ) -> Result<bool, ActionFailure> {
        let Some(guard) = guard else {
            return Ok(true);
        };
        let ctx = ctx.with_stage(Stage::Guard);
        catch(|| guard.evaluate(&ctx)).map_err(|error| {
            tracing::warn!("Deny guard due to error: {}", error);
            failure(&ctx, error)
        })
    }
}

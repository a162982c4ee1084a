//! Do-activities and their cancellation.
//!
//! Cancellation is cooperative: exiting a state flips the activity's
//! [`CancellationToken`] according to the configured [`DoActivityPolicy`],
//! and the activity observes it through [`ActivityContext`].

use crate::action::{ActionFailure, DoActivity, Stage};
use crate::config::DoActivityPolicy;
use crate::data::StateId;
use crate::executor::TaskExecutor;
use crate::extended::ExtendedState;
use crate::message::Message;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Returned by [`ActivityContext::sleep`] when the activity was cancelled.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("do-activity interrupted")]
pub struct Interrupted;

#[derive(Default)]
struct TokenState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// One-shot cancellation flag that sleepers can wait on.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.state.cancelled.lock();
        *cancelled = true;
        self.state.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock()
    }

    /// Waits up to `timeout`; returns true if cancelled meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.state.cancelled.lock();
        while !*cancelled {
            if self
                .state
                .signal
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}

/// What a running do-activity can see.
pub struct ActivityContext {
    pub(crate) state: StateId,
    pub(crate) machine_id: Option<String>,
    pub(crate) message: Option<Message>,
    pub(crate) extended_state: Arc<ExtendedState>,
    pub(crate) token: CancellationToken,
}

impl ActivityContext {
    pub fn state(&self) -> &StateId {
        &self.state
    }

    pub fn machine_id(&self) -> Option<&str> {
        self.machine_id.as_deref()
    }

    /// The event that entered the state.
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn extended_state(&self) -> &ExtendedState {
        &self.extended_state
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sleeps for `duration` unless the activity is cancelled first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        if self.token.wait_timeout(duration) {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

/// A do-activity started for an active state.
pub(crate) struct RunningActivity {
    token: CancellationToken,
    finished: Arc<AtomicBool>,
    timeout: Duration,
}

impl RunningActivity {
    /// Starts the activity in a free activity slot of the blocking pool.
    pub(crate) fn spawn(
        executor: &TaskExecutor,
        activity: DoActivity,
        ctx: ActivityContext,
        timeout: Duration,
        on_failure: Arc<dyn Fn(ActionFailure) + Send + Sync>,
    ) -> Self {
        let token = ctx.token.clone();
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        executor.spawn_activity(move || {
            tracing::debug!("do-activity of {} started", ctx.state);
            if let Err(error) = activity.run(&ctx) {
                tracing::error!("do-activity of {} failed: {}", ctx.state, error);
                on_failure(ActionFailure {
                    stage: Stage::StateDo,
                    state: Some(ctx.state.clone()),
                    source: None,
                    target: None,
                    event: ctx.message.as_ref().map(|m| m.payload.clone()),
                    error,
                });
            }
            done.store(true, Ordering::SeqCst);
            tracing::debug!("do-activity of {} finished", ctx.state);
        });
        Self {
            token,
            finished,
            timeout,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Applies the exit policy.
    pub(crate) fn stop(self, policy: DoActivityPolicy, executor: &TaskExecutor) {
        if self.is_finished() {
            return;
        }
        match policy {
            DoActivityPolicy::None => {}
            DoActivityPolicy::ImmediateCancel => self.token.cancel(),
            DoActivityPolicy::TimeoutCancel => {
                let token = self.token;
                let finished = self.finished;
                let timeout = self.timeout;
                executor.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if !finished.load(Ordering::SeqCst) {
                        tracing::debug!("do-activity grace period of {:?} elapsed", timeout);
                        token.cancel();
                    }
                });
            }
        }
    }

    /// Cancels regardless of policy, used when the machine stops.
    pub(crate) fn cancel(self) {
        self.token.cancel();
    }
}

//! Timer-triggered transitions.
//!
//! Each armed timer is a tokio task that ticks on the executor and hands a
//! `(transition, generation)` pair back to the machine. Re-arming or
//! cancelling bumps the generation, so a tick that was already queued when
//! its source state exited is recognised as stale and dropped.

use crate::executor::TaskExecutor;
use crate::model::{TimerSpec, TransitionIdx};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Delivers a tick; returns `false` once the machine is gone.
pub(crate) type TimerFire = Arc<dyn Fn(TransitionIdx, u64) -> bool + Send + Sync>;

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct TimerScheduler {
    armed: HashMap<TransitionIdx, ArmedTimer>,
    next_generation: u64,
}

impl TimerScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arms the timer of `transition`, replacing any previous arming.
    pub(crate) fn schedule(
        &mut self,
        executor: &TaskExecutor,
        transition: TransitionIdx,
        spec: TimerSpec,
        fire: TimerFire,
    ) {
        self.cancel(transition);
        self.next_generation += 1;
        let generation = self.next_generation;

        let handle = executor.spawn(async move {
            let first = spec.initial_delay.unwrap_or(spec.period);
            let mut ticker = interval_at(Instant::now() + first, spec.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut fired = 0u32;
            loop {
                ticker.tick().await;
                if !fire(transition, generation) {
                    break;
                }
                fired += 1;
                if spec.count > 0 && fired >= spec.count {
                    break;
                }
            }
        });

        self.armed.insert(transition, ArmedTimer { generation, handle });
    }

    pub(crate) fn is_current(&self, transition: TransitionIdx, generation: u64) -> bool {
        self.armed
            .get(&transition)
            .is_some_and(|t| t.generation == generation)
    }

    pub(crate) fn cancel(&mut self, transition: TransitionIdx) {
        if let Some(timer) = self.armed.remove(&transition) {
            timer.handle.abort();
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.handle.abort();
        }
    }

    pub(crate) fn armed(&self) -> usize {
        self.armed.len()
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

//! Task executor for timers and do-activities.

use crate::config::ExecutorConfig;
use crate::error::CoreError;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Blocking threads an owned runtime keeps beyond the do-activity limit,
/// so queue drains scheduled by timer ticks never wait behind activities.
const DISPATCH_THREADS: usize = 4;

/// Either an owned tokio runtime or a handle to one the caller runs.
///
/// Do-activities and queue drains share the runtime's blocking pool, but at
/// most `max_blocking_threads` activities hold a thread at any time.
pub struct TaskExecutor {
    runtime: Option<Runtime>,
    handle: Handle,
    activities: Arc<Semaphore>,
}

impl TaskExecutor {
    /// Builds an owned multi-thread runtime.
    pub fn new(config: &ExecutorConfig) -> Result<Self, CoreError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .max_blocking_threads(config.max_blocking_threads + DISPATCH_THREADS)
            .thread_name("statechart-worker")
            .enable_time()
            .build()
            .map_err(|e| CoreError::Executor {
                reason: e.to_string(),
            })?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
            activities: Arc::new(Semaphore::new(config.max_blocking_threads)),
        })
    }

    /// Uses a runtime owned by the caller. It must have the time driver
    /// enabled; `max_activities` bounds concurrent do-activities on it.
    pub fn from_handle(handle: Handle, max_activities: usize) -> Self {
        Self {
            runtime: None,
            handle,
            activities: Arc::new(Semaphore::new(max_activities)),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    pub(crate) fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn_blocking(f)
    }

    /// Runs a do-activity on the blocking pool once an activity slot is free.
    pub(crate) fn spawn_activity<F>(&self, f: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let slots = self.activities.clone();
        let handle = self.handle.clone();
        self.handle.spawn(async move {
            let Ok(_slot) = slots.acquire_owned().await else {
                return;
            };
            if let Err(e) = handle.spawn_blocking(f).await {
                tracing::warn!("do-activity task ended abnormally: {}", e);
            }
        })
    }

    /// Activity slots not currently taken.
    pub fn available_activity_slots(&self) -> usize {
        self.activities.available_permits()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("owned", &self.runtime.is_some())
            .finish()
    }
}

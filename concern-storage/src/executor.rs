//! Bounded background executor for defaults fetches.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use concern_core::{ConfigError, DefaultsResult, StorageError};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Configuration for the refresh executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Name used in log output.
    pub name: String,
    /// Maximum number of fetches running at once.
    pub max_concurrent_fetches: usize,
    /// How long `shutdown` waits for outstanding fetches before abandoning them.
    pub shutdown_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "rwc-defaults-refresh".to_string(),
            max_concurrent_fetches: 1,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name used in log output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the maximum number of concurrent fetches.
    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max;
        self
    }

    /// Set how long shutdown waits before aborting outstanding fetches.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_fetches".to_string(),
                value: "0".to_string(),
                reason: "max_concurrent_fetches must be greater than 0".to_string(),
            });
        }
        if self.shutdown_grace.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "shutdown_grace".to_string(),
                value: format!("{:?}", self.shutdown_grace),
                reason: "shutdown_grace must be positive".to_string(),
            });
        }
        Ok(())
    }
}

struct TaskSet {
    tasks: JoinSet<()>,
    shut_down: bool,
}

/// Runs fetches off the calling thread on a bounded set of tokio tasks.
///
/// Every spawned task is tracked so that `shutdown` can drain them. Dropping
/// the executor without calling `shutdown` aborts whatever is still running.
pub struct RefreshExecutor {
    config: ExecutorConfig,
    runtime: Handle,
    permits: Arc<Semaphore>,
    state: Mutex<TaskSet>,
}

impl RefreshExecutor {
    /// Create an executor on the current tokio runtime.
    pub fn new(config: ExecutorConfig) -> DefaultsResult<Self> {
        let runtime = Handle::try_current().map_err(|_| StorageError::NoRuntime)?;
        Self::with_handle(config, runtime)
    }

    /// Create an executor that spawns onto `runtime`.
    pub fn with_handle(config: ExecutorConfig, runtime: Handle) -> DefaultsResult<Self> {
        config.validate()?;
        tracing::info!(
            executor = %config.name,
            max_concurrent_fetches = config.max_concurrent_fetches,
            "Refresh executor started"
        );
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_fetches)),
            config,
            runtime,
            state: Mutex::new(TaskSet {
                tasks: JoinSet::new(),
                shut_down: false,
            }),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Build a task with `make_task` and schedule it. Never waits for it to run.
    ///
    /// `make_task` is only called once the executor has accepted the work.
    pub fn spawn<M, F>(&self, make_task: M) -> DefaultsResult<()>
    where
        M: FnOnce() -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(StorageError::ExecutorShutdown.into());
        }
        // Reap finished tasks so the set only holds live work.
        while state.tasks.try_join_next().is_some() {}
        let task = make_task();
        state.tasks.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                task.await;
            },
            &self.runtime,
        );
        Ok(())
    }

    /// Number of tasks spawned and not yet reaped.
    pub fn outstanding(&self) -> usize {
        let mut state = self.state.lock();
        while state.tasks.try_join_next().is_some() {}
        state.tasks.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Stop accepting work and drain outstanding tasks.
    ///
    /// Waits up to `shutdown_grace`, then aborts whatever is left. Safe to call
    /// more than once.
    pub async fn shutdown(&self) {
        let mut draining = {
            let mut state = self.state.lock();
            state.shut_down = true;
            std::mem::take(&mut state.tasks)
        };
        let outstanding = draining.len();

        let drain = async {
            while let Some(result) = draining.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!(executor = %self.config.name, "Refresh task panicked");
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.shutdown_grace, drain)
            .await
            .is_err()
        {
            tracing::warn!(
                executor = %self.config.name,
                remaining = draining.len(),
                grace_ms = self.config.shutdown_grace.as_millis() as u64,
                "Abandoning refresh tasks still running after shutdown grace period"
            );
            draining.shutdown().await;
        }

        tracing::info!(
            executor = %self.config.name,
            drained = outstanding,
            "Refresh executor shut down"
        );
    }
}

impl Drop for RefreshExecutor {
    fn drop(&mut self) {
        // JoinSet aborts its tasks when dropped; just make it visible.
        let state = self.state.get_mut();
        if !state.tasks.is_empty() {
            tracing::debug!(
                executor = %self.config.name,
                aborted = state.tasks.len(),
                "Refresh executor dropped with outstanding tasks"
            );
        }
    }
}

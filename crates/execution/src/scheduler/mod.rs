//! Scheduler for the engine's periodic loops.
//!
//! Every task runs on its own timer in its own tokio task. All tasks share
//! one cancellation token; on cancel each loop abandons its wait and exits
//! after the iteration in progress.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A named body run every `period`.
#[derive(Clone)]
pub struct ScheduledTask {
    /// Task name.
    pub name: String,
    /// Time between iteration starts.
    pub period: Duration,
    /// Whether the task is started.
    pub enabled: bool,
    body: TaskFn,
}

impl ScheduledTask {
    /// Creates a new task.
    pub fn new<F, Fut>(name: impl Into<String>, period: Duration, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            period,
            enabled: true,
            body: Arc::new(move || -> TaskFuture { Box::pin(body()) }),
        }
    }

    /// Disables the task.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Runs periodic tasks until the shared token is cancelled.
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    shutdown: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    /// Creates a new scheduler driven by `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Adds a task to the scheduler.
    pub fn add_task(&mut self, task: ScheduledTask) {
        info!(task = %task.name, period_ms = task.period.as_millis() as u64, "Adding task to scheduler");
        self.tasks.push(task);
    }

    /// Gets all tasks.
    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// Spawns every enabled task.
    pub fn start(&mut self) {
        info!(tasks = self.tasks.len(), "Starting scheduler");
        for task in self.tasks.iter().filter(|t| t.enabled) {
            let task = task.clone();
            let shutdown = self.shutdown.clone();
            let name = task.name.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = interval(task.period.max(Duration::from_millis(1)));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            debug!(task = %task.name, "Task triggered");
                            (task.body)().await;
                        }
                    }
                }
                debug!(task = %task.name, "Task stopped");
            });
            self.handles.push((name, handle));
        }
    }

    /// Cancels the token shared by every task.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Checks if the scheduler is running.
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty() && !self.shutdown.is_cancelled()
    }

    /// Waits for every spawned task to exit.
    pub async fn join(&mut self) {
        for (name, handle) in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(task = %name, error = %e, "Task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

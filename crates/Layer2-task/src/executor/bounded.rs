//! Bounded async task executor
//!
//! Work is admitted against a fixed capacity (`max_workers + queue_capacity`)
//! and runs on at most `max_workers` concurrent workers. Each running task is
//! raced against its deadline with `tokio::select!`.

use crate::state::TaskOutcome;
use crate::task::{Task, TaskId};
use cmsync_foundation::{Error, ExecutorSettings, Result};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Late work still running after this many timeouts is reported as overrun
const OVERRUN_FACTOR: u32 = 4;

// ============================================================================
// Config
// ============================================================================

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Concurrently running tasks
    pub max_workers: usize,

    /// Admitted tasks allowed to wait for a worker
    pub queue_capacity: usize,

    /// Timeout for tasks that do not carry their own
    pub default_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig::from(&ExecutorSettings::default())
    }
}

impl From<&ExecutorSettings> for ExecutorConfig {
    fn from(settings: &ExecutorSettings) -> Self {
        Self {
            max_workers: settings.max_workers.max(1),
            queue_capacity: settings.queue_capacity,
            default_timeout: settings.task_timeout(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Total number of unfinished tasks the executor accepts
    pub fn capacity(&self) -> usize {
        self.max_workers + self.queue_capacity
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Default)]
struct StatsCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    overrun: AtomicU64,
    active: AtomicUsize,
}

/// Snapshot of executor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Timed-out tasks whose work kept running past the overrun limit
    pub overrun: u64,
    /// Tasks currently holding a worker
    pub active: usize,
    /// Admitted tasks not yet finished (waiting or running)
    pub in_flight: usize,
}

// ============================================================================
// TaskHandle
// ============================================================================

/// Completion handle returned by [`AsyncTaskExecutor::submit`]
///
/// Resolves exactly once with the task's terminal outcome.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    rx: oneshot::Receiver<TaskOutcome<T>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the terminal outcome
    pub async fn outcome(self) -> TaskOutcome<T> {
        self.await
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskOutcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| TaskOutcome::Failed("task supervisor dropped".to_string()))
        })
    }
}

// ============================================================================
// AsyncTaskExecutor
// ============================================================================

/// Bounded-concurrency runner with a hard per-task timeout
#[derive(Clone)]
pub struct AsyncTaskExecutor {
    config: Arc<ExecutorConfig>,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    stats: Arc<StatsCounters>,
    shutdown: CancellationToken,
}

impl AsyncTaskExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            admission: Arc::new(Semaphore::new(config.capacity())),
            workers: Arc::new(Semaphore::new(config.max_workers)),
            stats: Arc::new(StatsCounters::default()),
            shutdown: CancellationToken::new(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Submit work without waiting for it.
    ///
    /// Fails with [`Error::Saturated`] when `max_workers + queue_capacity`
    /// tasks are already admitted and unfinished. The work receives a
    /// cancellation token that is cancelled when its deadline passes.
    pub fn submit<T, F, Fut>(&self, task: Task, work: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let admitted = match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.rejected.fetch_add(1, Ordering::SeqCst);
                debug!(task = %task, "Executor saturated, rejecting task");
                return Err(Error::Saturated(format!(
                    "{} tasks already admitted",
                    self.config.capacity()
                )));
            }
        };
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        let id = task.id;
        let timeout = task.timeout_or(self.config.default_timeout);
        let workers = Arc::clone(&self.workers);
        let stats = Arc::clone(&self.stats);
        let token = self.shutdown.child_token();

        tokio::spawn(async move {
            // Both permits are held until the work has actually returned
            let worker = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                    drop(admitted);
                    let _ = tx.send(TaskOutcome::Failed("executor shut down".to_string()));
                    return;
                }
            };

            stats.active.fetch_add(1, Ordering::SeqCst);
            debug!(task = %task, timeout_ms = timeout.as_millis() as u64, "Task started");
            let started = Instant::now();
            let mut running = tokio::spawn(work(token.clone()));

            let outcome = tokio::select! {
                joined = &mut running => match joined {
                    Ok(Ok(value)) => TaskOutcome::Completed(value),
                    Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                    Err(e) if e.is_panic() => {
                        TaskOutcome::Failed(format!("task panicked: {}", panic_message(e.into_panic())))
                    }
                    Err(e) => TaskOutcome::Failed(format!("task aborted: {}", e)),
                },
                _ = tokio::time::sleep(timeout) => {
                    token.cancel();
                    TaskOutcome::TimedOut
                }
            };

            let counter = match &outcome {
                TaskOutcome::Completed(_) => &stats.completed,
                TaskOutcome::Failed(_) => &stats.failed,
                TaskOutcome::TimedOut => &stats.timed_out,
            };
            counter.fetch_add(1, Ordering::SeqCst);

            if !outcome.is_timed_out() {
                debug!(task = %task, outcome = outcome.display_name(), "Task finished");
                stats.active.fetch_sub(1, Ordering::SeqCst);
                drop(worker);
                drop(admitted);
                let _ = tx.send(outcome);
                return;
            }

            warn!(task = %task, elapsed_ms = started.elapsed().as_millis() as u64, "Task timed out");
            let _ = tx.send(outcome);

            // Late result is discarded
            let overrun_limit = timeout.saturating_mul(OVERRUN_FACTOR);
            let remaining = overrun_limit.saturating_sub(started.elapsed());
            if tokio::time::timeout(remaining, &mut running).await.is_err() {
                stats.overrun.fetch_add(1, Ordering::SeqCst);
                warn!(
                    task = %task,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed-out task ignores cancellation and still holds a worker"
                );
                let _ = running.await;
            }
            debug!(task = %task, elapsed_ms = started.elapsed().as_millis() as u64, "Timed-out task returned");
            stats.active.fetch_sub(1, Ordering::SeqCst);
            drop(worker);
            drop(admitted);
        });

        Ok(TaskHandle { id, rx })
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            submitted: self.stats.submitted.load(Ordering::SeqCst),
            rejected: self.stats.rejected.load(Ordering::SeqCst),
            completed: self.stats.completed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            timed_out: self.stats.timed_out.load(Ordering::SeqCst),
            overrun: self.stats.overrun.load(Ordering::SeqCst),
            active: self.stats.active.load(Ordering::SeqCst),
            in_flight: self.config.capacity() - self.admission.available_permits(),
        }
    }

    /// Reject new work, cancel running work, fail tasks still waiting for a worker
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.workers.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

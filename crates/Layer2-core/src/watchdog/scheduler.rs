//! Watchdog scheduler
//!
//! Each tick enumerates handles that need a module sync, skips those already
//! in flight, shuffles and batches the rest and submits one executor task per
//! batch. Outcomes are handled by a per-batch completion watcher so the tick
//! itself never waits on DMI I/O.
//!
//! ADVISED handles and requested upgrades go out on every tick. Failed LOCKED
//! handles are only looked at once per `lockedRetryPeriodMs`, and then only
//! when their attempt backoff has run out.

use super::in_progress::InProgressMap;
use super::ledger::BatchLedger;
use super::worker::{BatchSummary, ModuleSyncWorker};
use crate::inventory::{CmHandle, RegistryPersistence};
use crate::state::LockReasonCategory;
use chrono::{DateTime, Utc};
use cmsync_foundation::{Error, Result, WatchdogSettings};
use cmsync_task::{AsyncTaskExecutor, CancellationToken, Task, TaskOutcome};
use rand::seq::SliceRandom;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const MODULE_SYNC_OPERATION: &str = "module-sync";

// ============================================================================
// Reports
// ============================================================================

/// Result of one tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Handles due for a sync this tick
    pub candidates: usize,
    /// LOCKED handles left alone until their retry is due
    pub backing_off: usize,
    /// Candidates skipped because an earlier batch still holds them
    pub in_flight: usize,
    /// Handles handed to the executor
    pub submitted: usize,
    /// Handles released because the executor was saturated
    pub deferred: usize,
    pub batches: Vec<BatchHandle>,
}

/// Final view of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub size: usize,
    /// `Completed`, `Failed` or `TimedOut`
    pub outcome: &'static str,
    pub summary: BatchSummary,
}

/// Completion watcher of a submitted batch
#[derive(Debug)]
pub struct BatchHandle {
    join: JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Wait until the batch is settled and its handles released
    pub async fn wait(self) -> Result<BatchReport> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("batch watcher failed: {}", e)))
    }
}

// ============================================================================
// WatchdogScheduler
// ============================================================================

pub struct WatchdogScheduler {
    persistence: Arc<RegistryPersistence>,
    worker: Arc<ModuleSyncWorker>,
    executor: AsyncTaskExecutor,
    in_progress: Arc<InProgressMap>,
    settings: WatchdogSettings,
    /// Start of the last tick that looked at LOCKED handles
    last_locked_pass: Mutex<Option<Instant>>,
}

impl WatchdogScheduler {
    pub fn new(
        persistence: Arc<RegistryPersistence>,
        worker: Arc<ModuleSyncWorker>,
        executor: AsyncTaskExecutor,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            in_progress: Arc::new(InProgressMap::new(settings.in_progress_ttl())),
            persistence,
            worker,
            executor,
            settings,
            last_locked_pass: Mutex::new(None),
        }
    }

    pub fn in_progress(&self) -> &InProgressMap {
        &self.in_progress
    }

    pub fn executor(&self) -> &AsyncTaskExecutor {
        &self.executor
    }

    /// Tick every `period` until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.settings.enabled {
            info!("Watchdog disabled");
            shutdown.cancelled().await;
            return;
        }

        info!(
            period_ms = self.settings.period_ms,
            batch_size = self.settings.batch_size,
            "Watchdog started"
        );
        let mut interval = tokio::time::interval(self.settings.period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.candidates > 0 => info!(
                            candidates = report.candidates,
                            backing_off = report.backing_off,
                            submitted = report.submitted,
                            deferred = report.deferred,
                            in_flight = report.in_flight,
                            "Watchdog tick"
                        ),
                        Ok(_) => debug!("Watchdog tick, nothing to sync"),
                        Err(e) => warn!(error = %e, "Watchdog tick failed, retrying next period"),
                    }
                }
            }
        }
        info!("Watchdog stopped");
    }

    /// Enumerate, batch and submit once
    pub async fn tick(&self) -> Result<TickReport> {
        let expired = self.in_progress.purge_expired();
        if expired > 0 {
            warn!(expired, "In-progress claims expired");
        }

        let locked_pass = self.locked_pass_due();
        let now = Utc::now();
        let (candidates, waiting): (Vec<CmHandle>, Vec<CmHandle>) = self
            .persistence
            .sync_candidates()
            .await?
            .into_iter()
            .partition(|h| self.is_due(h, now, locked_pass));
        let mut report = TickReport {
            candidates: candidates.len(),
            backing_off: waiting.len(),
            ..TickReport::default()
        };

        let mut claimed: Vec<CmHandle> = candidates
            .into_iter()
            .filter(|h| self.in_progress.try_claim(&h.id))
            .collect();
        report.in_flight = report.candidates - claimed.len();
        claimed.shuffle(&mut rand::thread_rng());

        let batch_size = self.settings.batch_size.max(1);
        let mut pending = claimed.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<CmHandle> = pending.by_ref().take(batch_size).collect();
            let size = batch.len();
            match self.submit_batch(batch) {
                Ok(handle) => {
                    report.submitted += size;
                    report.batches.push(handle);
                }
                Err((ids, e)) => {
                    self.in_progress.release_all(ids.iter().map(String::as_str));
                    report.deferred += size;
                    if !matches!(e, Error::Saturated(_)) {
                        // shutdown: release what is left as well
                        let rest: Vec<String> = pending.map(|h| h.id).collect();
                        report.deferred += rest.len();
                        self.in_progress.release_all(rest.iter().map(String::as_str));
                        return Err(e);
                    }
                    debug!(size, "Executor saturated, batch deferred to next tick");
                }
            }
        }

        Ok(report)
    }

    /// Whether this tick looks at failed LOCKED handles; starts the next locked pass if so
    fn locked_pass_due(&self) -> bool {
        let mut last = self.last_locked_pass.lock();
        let due = last
            .map(|at| at.elapsed() >= self.settings.locked_retry_period())
            .unwrap_or(true);
        if due {
            *last = Some(Instant::now());
        }
        due
    }

    fn is_due(&self, handle: &CmHandle, now: DateTime<Utc>, locked_pass: bool) -> bool {
        match handle.state.lock_reason() {
            None => true,
            Some(reason) if reason.reason == LockReasonCategory::ModuleUpgrade => true,
            Some(_) => {
                locked_pass && handle.state.retry_due(now, self.settings.retry_backoff_base())
            }
        }
    }

    fn submit_batch(&self, batch: Vec<CmHandle>) -> std::result::Result<BatchHandle, (Vec<String>, Error)> {
        let ids: Vec<String> = batch.iter().map(|h| h.id.clone()).collect();
        let ledger = Arc::new(BatchLedger::new(ids.iter().cloned()));
        let task = Task::new(format!("batch of {}", ids.len()), MODULE_SYNC_OPERATION);
        let timeout = task.timeout_or(self.executor.config().default_timeout);

        let worker = Arc::clone(&self.worker);
        let work_ledger = Arc::clone(&ledger);
        let handle = match self.executor.submit(task, move |token| async move {
            worker.run_batch(batch, work_ledger, token).await
        }) {
            Ok(handle) => handle,
            Err(e) => return Err((ids, e)),
        };

        let worker = Arc::clone(&self.worker);
        let in_progress = Arc::clone(&self.in_progress);
        let join = tokio::spawn(async move {
            let size = ids.len();
            let outcome = handle.await;
            let summary = match outcome {
                TaskOutcome::Completed(ref summary) => summary.clone(),
                TaskOutcome::TimedOut => {
                    let unsettled = ledger.close();
                    let error = Error::Timeout(timeout_details(timeout));
                    warn!(unsettled = unsettled.len(), error = %error, "Module sync batch timed out");
                    let timed_out = worker.settle_timeouts(&unsettled, &error).await;
                    BatchSummary {
                        timed_out,
                        ..BatchSummary::default()
                    }
                }
                TaskOutcome::Failed(ref e) => {
                    let unsettled = ledger.close();
                    error!(unsettled = unsettled.len(), error = %e, "Module sync batch failed");
                    BatchSummary {
                        skipped: unsettled.len(),
                        ..BatchSummary::default()
                    }
                }
            };
            in_progress.release_all(ids.iter().map(String::as_str));
            BatchReport {
                size,
                outcome: outcome.display_name(),
                summary,
            }
        });

        Ok(BatchHandle { join })
    }
}

fn timeout_details(timeout: Duration) -> String {
    format!("module sync timed out after {}ms", timeout.as_millis())
}

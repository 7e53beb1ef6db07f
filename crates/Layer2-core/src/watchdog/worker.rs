//! Module sync worker
//!
//! Runs inside executor tasks: one DMI call per handle, mapped to a trigger
//! and applied through persistence. A failure of one handle never stops the
//! rest of its batch.

use super::ledger::BatchLedger;
use crate::dmi::{DmiClient, DmiOperation};
use crate::inventory::{CmHandle, RegistryPersistence, TransitionRecord};
use crate::notify::EventNotifier;
use crate::state::{StateMonitor, Trigger};
use chrono::Utc;
use cmsync_foundation::{Error, Result};
use cmsync_task::CancellationToken;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters of one batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Transitions written
    pub applied: usize,
    /// Settled without a state change
    pub unchanged: usize,
    /// Results that arrived after the batch was closed
    pub discarded: usize,
    /// Handles whose transition could not be applied (stay candidates)
    pub skipped: usize,
    /// Handles locked because the batch timed out
    pub timed_out: usize,
}

enum Settlement {
    Applied,
    Unchanged,
    Discarded,
    Skipped,
}

pub struct ModuleSyncWorker {
    persistence: Arc<RegistryPersistence>,
    dmi: Arc<dyn DmiClient>,
    notifier: Arc<EventNotifier>,
    monitor: Arc<StateMonitor>,
}

impl ModuleSyncWorker {
    pub fn new(
        persistence: Arc<RegistryPersistence>,
        dmi: Arc<dyn DmiClient>,
        notifier: Arc<EventNotifier>,
        monitor: Arc<StateMonitor>,
    ) -> Self {
        Self {
            persistence,
            dmi,
            notifier,
            monitor,
        }
    }

    /// Sync each handle in order; stops early once `token` is cancelled
    pub async fn run_batch(
        &self,
        handles: Vec<CmHandle>,
        ledger: Arc<BatchLedger>,
        token: CancellationToken,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        for handle in &handles {
            if token.is_cancelled() {
                debug!(remaining = ledger.unsettled_count(), "Batch cancelled");
                break;
            }
            match self.sync_one(handle, &ledger, &token).await {
                Settlement::Applied => summary.applied += 1,
                Settlement::Unchanged => summary.unchanged += 1,
                Settlement::Discarded => summary.discarded += 1,
                Settlement::Skipped => summary.skipped += 1,
            }
        }
        Ok(summary)
    }

    async fn sync_one(
        &self,
        handle: &CmHandle,
        ledger: &BatchLedger,
        token: &CancellationToken,
    ) -> Settlement {
        let upgrade_target = handle.upgrade_target();
        let tag = upgrade_target.as_deref().or(handle.module_set_tag.as_deref());
        let operation = DmiOperation::module_sync(tag);
        let result = tokio::select! {
            result = self.dmi.invoke(&handle.dmi_service_name, &handle.id, &operation) => result,
            _ = token.cancelled() => {
                debug!(cm_handle_id = %handle.id, "Module sync abandoned after cancellation");
                return Settlement::Discarded;
            }
        };

        let trigger = match result {
            Ok(_) => Trigger::SyncSuccess,
            Err(e) => {
                warn!(cm_handle_id = %handle.id, error = %e, "Module sync failed");
                Trigger::from_error(&e)
            }
        };

        if !ledger.settle(&handle.id) {
            debug!(cm_handle_id = %handle.id, "Late module sync result discarded");
            return Settlement::Discarded;
        }

        if let (Trigger::SyncSuccess, Some(tag)) = (&trigger, &upgrade_target) {
            if let Err(e) = self
                .persistence
                .set_module_set_tag(&handle.id, tag, Utc::now())
                .await
            {
                error!(cm_handle_id = %handle.id, error = %e, "Failed to record upgraded module set tag, will retry next cycle");
                return Settlement::Skipped;
            }
            info!(cm_handle_id = %handle.id, module_set_tag = %tag, "Module set tag upgraded");
        }

        match self.apply(&handle.id, &trigger).await {
            Some(record) if record.changed => Settlement::Applied,
            Some(_) => Settlement::Unchanged,
            None => Settlement::Skipped,
        }
    }

    /// Lock every handle a timed-out batch left unsettled
    pub async fn settle_timeouts(&self, ids: &[String], error: &Error) -> usize {
        let trigger = Trigger::from_error(error);
        let mut locked = 0;
        for id in ids {
            if let Some(record) = self.apply(id, &trigger).await {
                if record.changed {
                    locked += 1;
                }
            }
        }
        locked
    }

    /// Apply, count and publish one transition. `None` when nothing could be applied.
    pub async fn apply(&self, id: &str, trigger: &Trigger) -> Option<TransitionRecord> {
        let now = Utc::now();
        match self.persistence.apply_transition(id, trigger, now).await {
            Ok(record) => {
                if record.changed {
                    self.monitor
                        .record(Some(record.previous.state()), Some(record.next.state()));
                    if let Some(reason) = record.next.lock_reason() {
                        info!(
                            cm_handle_id = %id,
                            reason = %reason.reason,
                            details = %reason.details,
                            "{}",
                            reason.reason.message()
                        );
                    }
                    self.notifier.notify_transition(&record, now).await;
                }
                Some(record)
            }
            Err(Error::InvalidTransition(reason)) => {
                info!(cm_handle_id = %id, trigger = %trigger, reason = %reason, "Transition rejected");
                None
            }
            Err(Error::NotFound(_)) => {
                warn!(cm_handle_id = %id, "cm handle disappeared, skipping");
                None
            }
            Err(e) => {
                error!(cm_handle_id = %id, trigger = %trigger, error = %e, "Failed to persist transition, will retry next cycle");
                None
            }
        }
    }
}

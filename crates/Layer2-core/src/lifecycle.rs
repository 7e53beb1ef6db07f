//! CM handle lifecycle
//!
//! Registration, upgrade and deletion of handles. All of them publish LCM
//! events and keep the state monitor in step with the registry.

use crate::inventory::{
    CmHandle, NewCmHandle, RegisterOutcome, RegistryPersistence, TransitionRecord,
};
use crate::notify::EventNotifier;
use crate::state::{CmHandleState, StateMachine, StateMonitor, Trigger};
use chrono::Utc;
use cmsync_foundation::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-handle result of a batch registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub cm_handle_id: String,
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Created,
    AlreadyRegistered,
    Failed,
}

pub struct CmHandleLifecycle {
    persistence: Arc<RegistryPersistence>,
    notifier: Arc<EventNotifier>,
    monitor: Arc<StateMonitor>,
}

impl CmHandleLifecycle {
    pub fn new(
        persistence: Arc<RegistryPersistence>,
        notifier: Arc<EventNotifier>,
        monitor: Arc<StateMonitor>,
    ) -> Self {
        Self {
            persistence,
            notifier,
            monitor,
        }
    }

    /// Register handles in ADVISED state. One bad entry does not stop the rest.
    pub async fn register(&self, handles: &[NewCmHandle]) -> Vec<RegistrationResult> {
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let now = Utc::now();
            let result = match self.persistence.register(handle, now).await {
                Ok(RegisterOutcome::Created) => {
                    let initial = StateMachine::initial_state();
                    self.monitor.record(None, Some(initial.state()));
                    self.notifier.notify(&handle.id, None, &initial, now).await;
                    RegistrationResult {
                        cm_handle_id: handle.id.clone(),
                        status: RegistrationStatus::Created,
                        error: None,
                    }
                }
                Ok(RegisterOutcome::AlreadyRegistered) => RegistrationResult {
                    cm_handle_id: handle.id.clone(),
                    status: RegistrationStatus::AlreadyRegistered,
                    error: None,
                },
                Err(e) => {
                    warn!(cm_handle_id = %handle.id, error = %e, "Registration failed");
                    RegistrationResult {
                        cm_handle_id: handle.id.clone(),
                        status: RegistrationStatus::Failed,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        results
    }

    /// Move a handle through DELETING to DELETED. The DELETED entry stays in
    /// the registry until [`purge`](Self::purge).
    pub async fn delete(&self, id: &str) -> Result<TransitionRecord> {
        let deleting = self.transition(id, &Trigger::Delete).await?;
        if deleting.next.state() == CmHandleState::Deleted {
            return Ok(deleting);
        }
        let deleted = self.transition(id, &Trigger::Delete).await?;
        info!(cm_handle_id = %id, "cm handle deleted");
        Ok(deleted)
    }

    /// Lock a READY handle for a module set upgrade; the watchdog carries it out.
    /// Asking for the tag the handle already runs with changes nothing.
    pub async fn upgrade(&self, id: &str, module_set_tag: &str) -> Result<TransitionRecord> {
        if module_set_tag.is_empty() || module_set_tag.chars().any(char::is_whitespace) {
            return Err(Error::Validation(format!(
                "invalid module set tag '{}'",
                module_set_tag
            )));
        }
        let handle = self.persistence.read_handle(id).await?;
        if handle.state.state() != CmHandleState::Ready {
            return Err(Error::Validation(format!(
                "cm handle {} is {}, only READY handles can be upgraded",
                id,
                handle.state.state()
            )));
        }
        if handle.module_set_tag.as_deref() == Some(module_set_tag) {
            info!(cm_handle_id = %id, module_set_tag, "cm handle already on module set tag");
            return Ok(TransitionRecord {
                cm_handle_id: handle.id,
                previous: handle.state.clone(),
                next: handle.state,
                changed: false,
            });
        }

        let record = self
            .transition(id, &Trigger::Upgrade(module_set_tag.to_string()))
            .await?;
        if let Some(reason) = record.next.lock_reason() {
            info!(cm_handle_id = %id, details = %reason.details, "{}", reason.reason.message());
        }
        Ok(record)
    }

    /// Remove a DELETED handle from the registry
    pub async fn purge(&self, id: &str) -> Result<()> {
        let current = self.persistence.read_state(id).await?.state;
        if current.state() != CmHandleState::Deleted {
            return Err(Error::Validation(format!(
                "cm handle {} is {}, only DELETED handles can be purged",
                id,
                current.state()
            )));
        }
        self.persistence.remove(id).await?;
        self.monitor.record(Some(CmHandleState::Deleted), None);
        info!(cm_handle_id = %id, "cm handle purged");
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Result<CmHandle> {
        self.persistence.read_handle(id).await
    }

    pub async fn all(&self) -> Result<Vec<CmHandle>> {
        self.persistence.all_handles().await
    }

    async fn transition(&self, id: &str, trigger: &Trigger) -> Result<TransitionRecord> {
        let now = Utc::now();
        let record = self.persistence.apply_transition(id, trigger, now).await?;
        if record.changed {
            self.monitor
                .record(Some(record.previous.state()), Some(record.next.state()));
            self.notifier.notify_transition(&record, now).await;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LockReasonCategory;
    use cmsync_foundation::{EventBus, EventSettings, InMemoryRegistryStore, RegistryStore};

    async fn lifecycle() -> (CmHandleLifecycle, Arc<EventBus>, Arc<StateMonitor>) {
        let store: Arc<dyn RegistryStore> = Arc::new(InMemoryRegistryStore::new());
        let persistence = Arc::new(
            RegistryPersistence::bootstrap(store, "/dmi-registry")
                .await
                .unwrap(),
        );
        let bus = Arc::new(EventBus::new());
        let notifier = Arc::new(EventNotifier::new(bus.clone(), EventSettings::default()));
        let monitor = Arc::new(StateMonitor::new());
        (
            CmHandleLifecycle::new(persistence, notifier, monitor.clone()),
            bus,
            monitor,
        )
    }

    #[tokio::test]
    async fn test_register_batch() {
        let (lifecycle, bus, monitor) = lifecycle().await;
        let handles = vec![
            NewCmHandle::new("cmh-1", "http://dmi"),
            NewCmHandle::new("cmh-1", "http://dmi"),
            NewCmHandle::new("bad id", "http://dmi"),
        ];
        let results = lifecycle.register(&handles).await;

        assert_eq!(results[0].status, RegistrationStatus::Created);
        assert_eq!(results[1].status, RegistrationStatus::AlreadyRegistered);
        assert_eq!(results[2].status, RegistrationStatus::Failed);
        assert!(results[2].error.is_some());

        assert_eq!(monitor.count(CmHandleState::Advised), 1);
        let events = bus.history(None).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["eventType"], "create");
    }

    #[tokio::test]
    async fn test_delete_then_purge() {
        let (lifecycle, bus, monitor) = lifecycle().await;
        lifecycle
            .register(&[NewCmHandle::new("cmh-1", "http://dmi")])
            .await;

        let record = lifecycle.delete("cmh-1").await.unwrap();
        assert_eq!(record.next.state(), CmHandleState::Deleted);
        assert_eq!(monitor.count(CmHandleState::Deleted), 1);
        assert_eq!(monitor.count(CmHandleState::Advised), 0);

        // create, update (DELETING), delete
        let types: Vec<String> = bus
            .history(None)
            .await
            .iter()
            .rev()
            .map(|m| m.payload["eventType"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["create", "update", "delete"]);

        assert!(matches!(
            lifecycle.delete("cmh-1").await,
            Err(Error::InvalidTransition(_))
        ));

        lifecycle.purge("cmh-1").await.unwrap();
        assert!(lifecycle.status("cmh-1").await.unwrap_err().is_not_found());
        assert_eq!(monitor.count(CmHandleState::Deleted), 0);
    }

    #[tokio::test]
    async fn test_purge_requires_deleted() {
        let (lifecycle, _, _) = lifecycle().await;
        lifecycle
            .register(&[NewCmHandle::new("cmh-1", "http://dmi")])
            .await;
        assert!(matches!(
            lifecycle.purge("cmh-1").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_upgrade_requires_ready() {
        let (lifecycle, _, _) = lifecycle().await;
        lifecycle
            .register(&[NewCmHandle::new("cmh-1", "http://dmi").with_module_set_tag("tag-1")])
            .await;
        assert!(matches!(
            lifecycle.upgrade("cmh-1", "tag-2").await,
            Err(Error::Validation(_))
        ));

        lifecycle.transition("cmh-1", &Trigger::SyncSuccess).await.unwrap();
        assert!(matches!(
            lifecycle.upgrade("cmh-1", "bad tag").await,
            Err(Error::Validation(_))
        ));
        let same = lifecycle.upgrade("cmh-1", "tag-1").await.unwrap();
        assert!(!same.changed);
        assert_eq!(same.next.state(), CmHandleState::Ready);

        let record = lifecycle.upgrade("cmh-1", "tag-2").await.unwrap();
        assert!(record.changed);
        let reason = record.next.lock_reason().unwrap();
        assert_eq!(reason.reason, LockReasonCategory::ModuleUpgrade);
        assert_eq!(reason.details, "Upgrade to ModuleSetTag: tag-2");

        let handle = lifecycle.status("cmh-1").await.unwrap();
        assert_eq!(handle.upgrade_target().as_deref(), Some("tag-2"));
        assert_eq!(handle.module_set_tag.as_deref(), Some("tag-1"));

        assert!(lifecycle.upgrade("nope", "tag-2").await.unwrap_err().is_not_found());
    }
}

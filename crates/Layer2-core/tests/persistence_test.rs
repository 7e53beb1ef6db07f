//! SQLite 레지스트리 위에서 RegistryPersistence 검증
//!
//! `cargo test -p cmsync-core --test persistence_test`

use chrono::Utc;
use cmsync_core::{
    CmHandleState, LockReason, LockReasonCategory, NewCmHandle, RegistryPersistence, Trigger,
    WriteOutcome,
};
use cmsync_foundation::{RegistryStore, SqliteRegistryStore};
use std::sync::Arc;
use tempfile::TempDir;

const ROOT: &str = "/dmi-registry";

async fn open(dir: &TempDir) -> RegistryPersistence {
    let store: Arc<dyn RegistryStore> = Arc::new(SqliteRegistryStore::new(dir.path()).unwrap());
    RegistryPersistence::bootstrap(store, ROOT).await.unwrap()
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let reason = LockReason::new(
        LockReasonCategory::ModuleUpgrade,
        "Upgrade to ModuleSetTag: tag-2",
    );

    {
        let persistence = open(&dir).await;
        persistence
            .register(
                &NewCmHandle::new("cmh-1", "http://dmi:8080").with_module_set_tag("tag-1"),
                Utc::now(),
            )
            .await
            .unwrap();
        persistence
            .write_state("cmh-1", CmHandleState::Locked, Some(reason.clone()), Utc::now())
            .await
            .unwrap();
    }

    let persistence = open(&dir).await;
    let handle = persistence.read_handle("cmh-1").await.unwrap();
    assert_eq!(handle.dmi_service_name, "http://dmi:8080");
    assert_eq!(handle.module_set_tag.as_deref(), Some("tag-1"));
    assert_eq!(handle.state.state(), CmHandleState::Locked);
    assert_eq!(handle.state.lock_reason(), Some(&reason));
}

#[tokio::test]
async fn test_upgrade_failure_keeps_tag_on_disk() {
    let dir = TempDir::new().unwrap();
    let persistence = open(&dir).await;
    persistence
        .register(&NewCmHandle::new("cmh-1", "http://dmi"), Utc::now())
        .await
        .unwrap();
    persistence
        .write_state(
            "cmh-1",
            CmHandleState::Locked,
            Some(LockReason::new(
                LockReasonCategory::ModuleUpgrade,
                "Upgrade to ModuleSetTag: tag-2",
            )),
            Utc::now(),
        )
        .await
        .unwrap();

    let record = persistence
        .apply_transition("cmh-1", &Trigger::SyncFailure("boom".into()), Utc::now())
        .await
        .unwrap();
    assert!(record.changed);

    let stored = persistence.read_state("cmh-1").await.unwrap().state;
    let reason = stored.lock_reason().unwrap();
    assert_eq!(reason.reason, LockReasonCategory::ModuleUpgradeFailed);
    assert_eq!(
        reason.details,
        "Upgrade to ModuleSetTag: tag-2 Attempt #1 failed: boom"
    );
}

#[tokio::test]
async fn test_unchanged_write_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let persistence = open(&dir).await;
    persistence
        .register(&NewCmHandle::new("cmh-1", "http://dmi"), Utc::now())
        .await
        .unwrap();

    let outcome = persistence
        .write_state("cmh-1", CmHandleState::Advised, None, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Unchanged);

    let candidates = persistence.sync_candidates().await.unwrap();
    assert_eq!(candidates.len(), 1);
}

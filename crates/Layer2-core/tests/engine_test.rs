//! SyncEngine 통합 테스트 - watchdog 루프가 주기적으로 handle을 동기화하는지 검증
//!
//! `cargo test -p cmsync-core --test engine_test`

use async_trait::async_trait;
use cmsync_core::{
    CmHandleState, DmiClient, DmiOperation, DmiResponse, NewCmHandle, RegistrationStatus,
    SyncEngine,
};
use cmsync_foundation::{
    Error, EventBus, InMemoryRegistryStore, RegistryStore, Result, SyncConfig,
};
use cmsync_task::CancellationToken;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

struct AlwaysUp;

#[async_trait]
impl DmiClient for AlwaysUp {
    async fn invoke(&self, _: &str, _: &str, _: &DmiOperation) -> Result<DmiResponse> {
        Ok(DmiResponse {
            status: 200,
            body: Value::Null,
        })
    }

    async fn health(&self, _: &str) -> String {
        "UP".to_string()
    }
}

fn config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.watchdog.period_ms = 20;
    config.executor.task_timeout_ms = 2_000;
    config
}

#[tokio::test]
async fn test_run_loop_syncs_registered_handles() {
    let store: Arc<dyn RegistryStore> = Arc::new(InMemoryRegistryStore::new());
    let bus = Arc::new(EventBus::new());
    let engine = Arc::new(
        SyncEngine::new(config(), store, Arc::new(AlwaysUp), bus.clone())
            .await
            .unwrap(),
    );

    let results = engine
        .lifecycle()
        .register(&[
            NewCmHandle::new("cmh-1", "http://dmi"),
            NewCmHandle::new("cmh-2", "http://dmi"),
        ])
        .await;
    assert!(results
        .iter()
        .all(|r| r.status == RegistrationStatus::Created));

    let shutdown = CancellationToken::new();
    let runner = {
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.run(shutdown).await })
    };

    // ticks every 20ms; give it a few periods
    let mut ready = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if engine.state_counts()["READY"] == 2 {
            ready = true;
            break;
        }
    }
    shutdown.cancel();
    runner.await.unwrap();

    assert!(ready, "handles never reached READY: {:?}", engine.state_counts());
    for id in ["cmh-1", "cmh-2"] {
        let snapshot = engine.persistence().read_state(id).await.unwrap();
        assert_eq!(snapshot.state.state(), CmHandleState::Ready);
    }
    // two creates, two updates
    assert_eq!(bus.event_count(), 4);
}

#[tokio::test]
async fn test_state_counts_seeded_from_registry() {
    let store: Arc<dyn RegistryStore> = Arc::new(InMemoryRegistryStore::new());
    {
        let engine = SyncEngine::new(
            config(),
            Arc::clone(&store),
            Arc::new(AlwaysUp),
            Arc::new(EventBus::new()),
        )
        .await
        .unwrap();
        engine
            .lifecycle()
            .register(&[NewCmHandle::new("cmh-1", "http://dmi")])
            .await;
    }

    let engine = SyncEngine::new(config(), store, Arc::new(AlwaysUp), Arc::new(EventBus::new()))
        .await
        .unwrap();
    assert_eq!(engine.state_counts()["ADVISED"], 1);
}

#[tokio::test]
async fn test_invalid_config_fails_at_startup() {
    let mut config = config();
    config.watchdog.batch_size = 0;
    let result = SyncEngine::new(
        config,
        Arc::new(InMemoryRegistryStore::new()),
        Arc::new(AlwaysUp),
        Arc::new(EventBus::new()),
    )
    .await;
    assert!(matches!(result, Err(Error::Config(_))));
}

//! Subcommand implementations

use anyhow::Context;
use async_trait::async_trait;
use cmsync_core::{
    CmHandle, DmiClient, HttpDmiClient, NewCmHandle, RegistrationStatus, SyncEngine,
};
use cmsync_foundation::{
    BusMessage, EventBus, EventListener, RegistryStore, SqliteRegistryStore, SyncConfig,
};
use cmsync_task::CancellationToken;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Logs every published LCM event
struct LogListener;

#[async_trait]
impl EventListener for LogListener {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_event(&self, message: &BusMessage) {
        info!(
            topic = %message.topic,
            key = %message.key,
            event_type = message.payload["eventType"].as_str().unwrap_or_default(),
            "LCM event"
        );
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<SyncConfig> {
    let config = match path {
        Some(path) => SyncConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SyncConfig::load().context("failed to load config")?,
    };
    Ok(config)
}

async fn engine(config: SyncConfig) -> anyhow::Result<SyncEngine> {
    let data_dir = config.registry.resolve_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let store: Arc<dyn RegistryStore> = Arc::new(SqliteRegistryStore::new(&data_dir)?);
    let dmi: Arc<dyn DmiClient> = Arc::new(HttpDmiClient::new(&config.dmi)?);

    let bus = Arc::new(EventBus::new());
    bus.subscribe(Arc::new(LogListener)).await;

    Ok(SyncEngine::new(config, store, dmi, bus).await?)
}

pub fn new_handle(id: String, dmi: String, module_set_tag: Option<String>) -> NewCmHandle {
    let handle = NewCmHandle::new(id, dmi);
    match module_set_tag {
        Some(tag) => handle.with_module_set_tag(tag),
        None => handle,
    }
}

pub fn read_handles(path: &Path) -> anyhow::Result<Vec<NewCmHandle>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid handle list in {}", path.display()))
}

// ============================================================================
// Commands
// ============================================================================

pub async fn run(config: SyncConfig) -> anyhow::Result<()> {
    let engine = engine(config).await?;
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        signal.cancel();
    });

    engine.run(shutdown).await;
    print_counts(&engine);
    Ok(())
}

pub async fn register(config: SyncConfig, handles: Vec<NewCmHandle>) -> anyhow::Result<()> {
    let engine = engine(config).await?;
    let results = engine.lifecycle().register(&handles).await;

    let mut failed = 0;
    for result in &results {
        match result.status {
            RegistrationStatus::Created => println!("✓ {} registered", result.cm_handle_id),
            RegistrationStatus::AlreadyRegistered => {
                println!("- {} already registered", result.cm_handle_id)
            }
            RegistrationStatus::Failed => {
                failed += 1;
                println!(
                    "✗ {} {}",
                    result.cm_handle_id,
                    result.error.as_deref().unwrap_or_default()
                );
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} registrations failed", failed, results.len());
    }
    Ok(())
}

pub async fn status(config: SyncConfig, id: Option<&str>) -> anyhow::Result<()> {
    let engine = engine(config).await?;

    if let Some(id) = id {
        let handle = engine.lifecycle().status(id).await?;
        println!("{}", serde_json::to_string_pretty(&handle)?);
        return Ok(());
    }

    let handles = engine.lifecycle().all().await?;
    if handles.is_empty() {
        println!("No cm handles registered.");
        return Ok(());
    }

    println!("{:<24} {:<10} {:<22} {}", "ID", "State", "Lock reason", "DMI");
    println!("{}", "-".repeat(80));
    for handle in &handles {
        print_row(handle);
    }
    println!();
    print_counts(&engine);
    Ok(())
}

pub async fn delete(config: SyncConfig, id: &str, purge: bool) -> anyhow::Result<()> {
    let engine = engine(config).await?;
    let record = engine.lifecycle().delete(id).await?;
    println!("✓ {} is {}", id, record.next.state());

    if purge {
        engine.lifecycle().purge(id).await?;
        println!("✓ {} removed from the registry", id);
    }
    Ok(())
}

pub async fn upgrade(config: SyncConfig, id: &str, module_set_tag: &str) -> anyhow::Result<()> {
    let engine = engine(config).await?;
    let record = engine.lifecycle().upgrade(id, module_set_tag).await?;
    if record.changed {
        println!("✓ {} locked for upgrade to {}; the watchdog syncs it next", id, module_set_tag);
    } else {
        println!("✓ {} already on {}", id, module_set_tag);
    }
    Ok(())
}

pub async fn health(config: &SyncConfig, dmi: &str) -> anyhow::Result<()> {
    let client = HttpDmiClient::new(&config.dmi)?;
    let status = client.health(dmi).await;
    if status.is_empty() {
        anyhow::bail!("{} did not report a health status", dmi);
    }
    println!("{}: {}", dmi, status);
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_row(handle: &CmHandle) {
    let reason = handle
        .state
        .lock_reason()
        .map(|r| r.reason.as_str())
        .unwrap_or("-");
    println!(
        "{:<24} {:<10} {:<22} {}",
        handle.id,
        handle.state.state().as_str(),
        reason,
        handle.dmi_service_name
    );
}

fn print_counts(engine: &SyncEngine) {
    let counts = engine
        .state_counts()
        .into_iter()
        .map(|(state, count)| format!("{}={}", state, count))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}", counts);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_handles() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("handles.json");
        std::fs::write(
            &path,
            r#"[{"id":"cmh-1","dmiServiceName":"http://dmi"},
                {"id":"cmh-2","dmiServiceName":"http://dmi","moduleSetTag":"tag-a"}]"#,
        )
        .unwrap();

        let handles = read_handles(&path).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[1].module_set_tag.as_deref(), Some("tag-a"));
    }

    #[test]
    fn test_new_handle() {
        let handle = new_handle("cmh-1".into(), "http://dmi".into(), Some("t".into()));
        assert_eq!(handle.module_set_tag.as_deref(), Some("t"));
    }
}

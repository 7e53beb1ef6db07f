//! Sync engine
//!
//! Wires persistence, executor, DMI client, notifier, monitor, watchdog and
//! lifecycle together from one [`SyncConfig`].

use crate::dmi::DmiClient;
use crate::inventory::RegistryPersistence;
use crate::lifecycle::CmHandleLifecycle;
use crate::notify::EventNotifier;
use crate::state::StateMonitor;
use crate::watchdog::{ModuleSyncWorker, WatchdogScheduler};
use cmsync_foundation::{EventPublisher, RegistryStore, Result, SyncConfig};
use cmsync_task::{AsyncTaskExecutor, CancellationToken, ExecutorConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub struct SyncEngine {
    config: SyncConfig,
    persistence: Arc<RegistryPersistence>,
    monitor: Arc<StateMonitor>,
    notifier: Arc<EventNotifier>,
    executor: AsyncTaskExecutor,
    scheduler: WatchdogScheduler,
    lifecycle: CmHandleLifecycle,
}

impl SyncEngine {
    /// Build the engine. Invalid configuration or an unusable registry root
    /// fail here, before anything runs.
    pub async fn new(
        config: SyncConfig,
        store: Arc<dyn RegistryStore>,
        dmi: Arc<dyn DmiClient>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        config.validate()?;

        let persistence =
            Arc::new(RegistryPersistence::bootstrap(store, &config.registry.root).await?);
        let monitor = Arc::new(StateMonitor::new());
        let handles = persistence.all_handles().await?;
        monitor.reset(handles.iter().map(|h| h.state.state()));

        let notifier = Arc::new(EventNotifier::new(publisher, config.events.clone()));
        let executor = AsyncTaskExecutor::new(ExecutorConfig::from(&config.executor));
        let worker = Arc::new(ModuleSyncWorker::new(
            Arc::clone(&persistence),
            dmi,
            Arc::clone(&notifier),
            Arc::clone(&monitor),
        ));
        let scheduler = WatchdogScheduler::new(
            Arc::clone(&persistence),
            worker,
            executor.clone(),
            config.watchdog.clone(),
        );
        let lifecycle = CmHandleLifecycle::new(
            Arc::clone(&persistence),
            Arc::clone(&notifier),
            Arc::clone(&monitor),
        );

        info!(
            root = %config.registry.root,
            handles = handles.len(),
            max_workers = config.executor.max_workers,
            "Sync engine ready"
        );
        Ok(Self {
            config,
            persistence,
            monitor,
            notifier,
            executor,
            scheduler,
            lifecycle,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn persistence(&self) -> &Arc<RegistryPersistence> {
        &self.persistence
    }

    pub fn lifecycle(&self) -> &CmHandleLifecycle {
        &self.lifecycle
    }

    pub fn scheduler(&self) -> &WatchdogScheduler {
        &self.scheduler
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    pub fn state_counts(&self) -> BTreeMap<&'static str, i64> {
        self.monitor.snapshot()
    }

    /// Run the watchdog until `shutdown`, then stop the executor
    pub async fn run(&self, shutdown: CancellationToken) {
        self.scheduler.run(shutdown).await;
        self.executor.shutdown();
        let stats = self.executor.stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            timed_out = stats.timed_out,
            overrun = stats.overrun,
            rejected = stats.rejected,
            "Sync engine stopped"
        );
    }
}

//! Event notifier
//!
//! Publishes an [`LcmEvent`] per state change, keyed by cm handle id.
//! Publishing never fails the caller; errors are logged only.

use super::event::LcmEvent;
use crate::inventory::TransitionRecord;
use crate::state::CompositeState;
use chrono::{DateTime, Utc};
use cmsync_foundation::{EventPublisher, EventSettings};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EventNotifier {
    publisher: Arc<dyn EventPublisher>,
    settings: EventSettings,
    published: AtomicU64,
    failed: AtomicU64,
}

impl EventNotifier {
    pub fn new(publisher: Arc<dyn EventPublisher>, settings: EventSettings) -> Self {
        Self {
            publisher,
            settings,
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.settings.topic
    }

    /// Publish the event for a change; `previous` is `None` for a new handle
    pub async fn notify(
        &self,
        cm_handle_id: &str,
        previous: Option<&CompositeState>,
        next: &CompositeState,
        at: DateTime<Utc>,
    ) {
        if !self.settings.enabled {
            return;
        }

        let event = LcmEvent::new(cm_handle_id, &self.settings.source, previous, next, &at);
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(cm_handle_id, error = %e, "Failed to encode LCM event");
                return;
            }
        };

        match self
            .publisher
            .publish(&self.settings.topic, cm_handle_id, payload)
            .await
        {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                debug!(cm_handle_id, event_type = %event.event_type, topic = %self.settings.topic, "LCM event published");
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(cm_handle_id, error = %e, "Failed to publish LCM event");
            }
        }
    }

    /// Publish for a persisted transition; unchanged records are skipped
    pub async fn notify_transition(&self, record: &TransitionRecord, at: DateTime<Utc>) {
        if record.changed {
            self.notify(&record.cm_handle_id, Some(&record.previous), &record.next, at)
                .await;
        }
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cmsync_foundation::{Error, EventBus, Result};
    use serde_json::Value;

    struct FailingPublisher;

    #[async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _topic: &str, _key: &str, _payload: Value) -> Result<()> {
            Err(Error::Internal("broker down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_publishes_keyed_by_handle_id() {
        let bus = Arc::new(EventBus::new());
        let notifier = EventNotifier::new(bus.clone(), EventSettings::default());
        notifier
            .notify("cmh-1", Some(&CompositeState::advised()), &CompositeState::ready(), Utc::now())
            .await;

        let history = bus.history(None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].key, "cmh-1");
        assert_eq!(history[0].topic, "ncmp-events");
        assert_eq!(history[0].payload["event"]["newValues"]["cmHandleState"], "READY");
        assert_eq!(notifier.published_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let notifier = EventNotifier::new(Arc::new(FailingPublisher), EventSettings::default());
        notifier
            .notify("cmh-1", None, &CompositeState::advised(), Utc::now())
            .await;
        assert_eq!(notifier.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_publishes_nothing() {
        let bus = Arc::new(EventBus::new());
        let settings = EventSettings {
            enabled: false,
            ..EventSettings::default()
        };
        let notifier = EventNotifier::new(bus.clone(), settings);
        notifier
            .notify("cmh-1", None, &CompositeState::advised(), Utc::now())
            .await;
        assert!(bus.history(None).await.is_empty());
    }
}

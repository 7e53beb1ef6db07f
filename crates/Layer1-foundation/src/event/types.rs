//! Event Types - 버스로 전달되는 메시지 정의

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Event ID
// ============================================================================

/// 이벤트 고유 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// 새 이벤트 ID 생성
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// BusMessage
// ============================================================================

/// 토픽/키와 함께 발행된 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: EventId,
    pub topic: String,
    /// 파티션 키 (CM handle id)
    pub key: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Value) -> Self {
        Self {
            id: EventId::new(),
            topic: topic.into(),
            key: key.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

// ============================================================================
// EventPublisher
// ============================================================================

/// publish(topic, key, event) 기능
///
/// 외부 메시지 브로커 또는 프로세스 내 [`EventBus`](super::EventBus)가 구현한다.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Value) -> Result<()>;
}

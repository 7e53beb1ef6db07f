//! Event Bus - 프로세스 내 메시지 브로드캐스트
//!
//! 토픽 기반 비동기 발행/구독. 외부 브로커가 없을 때 [`EventPublisher`]로 사용된다.

use super::types::{BusMessage, EventPublisher};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

// ============================================================================
// EventListener Trait
// ============================================================================

/// 이벤트 리스너 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// 이벤트 리스너 trait
#[async_trait]
pub trait EventListener: Send + Sync {
    /// 리스너 이름 (디버깅용)
    fn name(&self) -> &str;

    /// 관심 있는 토픽 (None이면 모든 토픽)
    fn topics(&self) -> Option<Vec<String>> {
        None
    }

    async fn on_event(&self, message: &BusMessage);
}

// ============================================================================
// EventFilter
// ============================================================================

/// 메시지 필터
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// 토픽 (정확히 일치)
    pub topics: Option<Vec<String>>,

    /// 키 (정확히 일치)
    pub keys: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn matches(&self, message: &BusMessage) -> bool {
        if let Some(ref topics) = self.topics {
            if !topics.contains(&message.topic) {
                return false;
            }
        }
        if let Some(ref keys) = self.keys {
            if !keys.contains(&message.key) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// 이벤트 버스 설정
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// 브로드캐스트 채널 용량
    pub channel_capacity: usize,

    /// 이벤트 히스토리 보관 개수
    pub history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_size: 100,
        }
    }
}

struct RegisteredListener {
    listener: Arc<dyn EventListener>,
    filter: Option<EventFilter>,
}

/// 이벤트 버스
pub struct EventBus {
    config: EventBusConfig,
    sender: broadcast::Sender<BusMessage>,
    listeners: RwLock<HashMap<ListenerId, RegisteredListener>>,
    listener_counter: AtomicU64,
    history: RwLock<VecDeque<BusMessage>>,
    event_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            config,
            sender,
            listeners: RwLock::new(HashMap::new()),
            listener_counter: AtomicU64::new(0),
            history: RwLock::new(VecDeque::new()),
            event_count: AtomicU64::new(0),
        }
    }

    /// 리스너 등록
    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.subscribe_with_filter(listener, None).await
    }

    /// 필터와 함께 리스너 등록
    pub async fn subscribe_with_filter(
        &self,
        listener: Arc<dyn EventListener>,
        filter: Option<EventFilter>,
    ) -> ListenerId {
        let id = ListenerId(self.listener_counter.fetch_add(1, Ordering::SeqCst));

        debug!(
            listener_name = listener.name(),
            listener_id = %id,
            "Registering event listener"
        );

        self.listeners
            .write()
            .await
            .insert(id, RegisteredListener { listener, filter });
        id
    }

    /// 리스너 해제
    pub async fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = self.listeners.write().await.remove(&id).is_some();
        if removed {
            debug!(listener_id = %id, "Unregistered event listener");
        }
        removed
    }

    /// 메시지 발행
    pub async fn dispatch(&self, message: BusMessage) {
        let count = self.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(
            event_id = %message.id,
            topic = %message.topic,
            key = %message.key,
            "Publishing event #{}", count
        );

        {
            let mut history = self.history.write().await;
            history.push_back(message.clone());
            while history.len() > self.config.history_size {
                history.pop_front();
            }
        }

        // 수신자가 없으면 에러지만 무시
        let _ = self.sender.send(message.clone());

        let listeners = self.listeners.read().await;
        for (id, registered) in listeners.iter() {
            let deliver = match &registered.filter {
                Some(filter) => filter.matches(&message),
                None => match registered.listener.topics() {
                    Some(topics) => topics.contains(&message.topic),
                    None => true,
                },
            };

            if deliver {
                trace!(
                    listener_id = %id,
                    listener_name = registered.listener.name(),
                    "Delivering event to listener"
                );
                registered.listener.on_event(&message).await;
            }
        }
    }

    /// 브로드캐스트 수신자 생성 (스트림 방식)
    pub fn receiver(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// 최근 이벤트 (최신순)
    pub async fn history(&self, limit: Option<usize>) -> Vec<BusMessage> {
        let history = self.history.read().await;
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// 필터로 히스토리 검색 (발행순)
    pub async fn search_history(&self, filter: &EventFilter) -> Vec<BusMessage> {
        self.history
            .read()
            .await
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect()
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// 총 발행된 이벤트 수
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, topic: &str, key: &str, payload: Value) -> Result<()> {
        self.dispatch(BusMessage::new(topic, key, payload)).await;
        Ok(())
    }
}

// ============================================================================
// 테스트
// ============================================================================

//! Event System - 이벤트 발행/구독 시스템
//!
//! 상태 변경(LCM) 이벤트는 [`EventPublisher`]로 발행된다. 외부 브로커 없이
//! 실행할 때는 [`EventBus`]가 프로세스 내에서 리스너와 수신자에게 전달한다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        EventBus                              │
//! │  publish(topic, key, payload)                               │
//! │         │                                                   │
//! │         ├──► history (최근 N개)                              │
//! │         ├──► broadcast::Receiver                            │
//! │         ▼                                                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │  Listener 1  │  │  Listener 2  │  │  Listener N  │      │
//! │  │  (Logging)   │  │  (Monitor)   │  │  (...)       │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusConfig, EventFilter, EventListener, ListenerId};
pub use types::{BusMessage, EventId, EventPublisher};

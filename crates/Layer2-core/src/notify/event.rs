//! LCM event envelope

use crate::state::{CmHandleState, CompositeState};
use chrono::{DateTime, Utc};
use cmsync_foundation::{format_registry_time, EventId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LcmEventType {
    Create,
    Update,
    Delete,
}

impl LcmEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LcmEventType::Create => "create",
            LcmEventType::Update => "update",
            LcmEventType::Delete => "delete",
        }
    }

    /// Event type for a change from `previous` (None for a new handle) to `next`
    pub fn for_change(previous: Option<&CompositeState>, next: &CompositeState) -> Self {
        match (previous, next.state()) {
            (_, CmHandleState::Deleted) => LcmEventType::Delete,
            (None, _) => LcmEventType::Create,
            (Some(_), _) => LcmEventType::Update,
        }
    }
}

impl fmt::Display for LcmEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State values carried in `oldValues` / `newValues`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmHandleValues {
    pub cm_handle_state: CmHandleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_reason: Option<LockReasonValues>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReasonValues {
    pub reason: String,
    pub details: String,
}

impl From<&CompositeState> for CmHandleValues {
    fn from(state: &CompositeState) -> Self {
        Self {
            cm_handle_state: state.state(),
            lock_reason: state.lock_reason().map(|r| LockReasonValues {
                reason: r.reason.as_str().to_string(),
                details: r.details.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LcmEventBody {
    pub cm_handle_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_values: Option<CmHandleValues>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_values: Option<CmHandleValues>,
}

/// Life-cycle-management event published on every state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LcmEvent {
    pub event_id: String,
    pub event_correlation_id: String,
    pub event_time: String,
    pub event_source: String,
    pub event_type: LcmEventType,
    pub event: LcmEventBody,
}

impl LcmEvent {
    pub fn new(
        cm_handle_id: &str,
        source: &str,
        previous: Option<&CompositeState>,
        next: &CompositeState,
        at: &DateTime<Utc>,
    ) -> Self {
        let event_type = LcmEventType::for_change(previous, next);
        let new_values = match event_type {
            LcmEventType::Delete => None,
            _ => Some(CmHandleValues::from(next)),
        };
        Self {
            event_id: EventId::new().to_string(),
            event_correlation_id: cm_handle_id.to_string(),
            event_time: format_registry_time(at),
            event_source: source.to_string(),
            event_type,
            event: LcmEventBody {
                cm_handle_id: cm_handle_id.to_string(),
                old_values: previous.map(CmHandleValues::from),
                new_values,
            },
        }
    }
}

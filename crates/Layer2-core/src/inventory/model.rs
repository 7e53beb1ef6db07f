//! CM handle registry model and its JSON form

use super::paths::{CM_HANDLES, LOCK_REASON, STATE};
use crate::state::{CmHandleState, CompositeState, LockDetails, LockReason};
use chrono::{DateTime, Utc};
use cmsync_foundation::{format_registry_time, parse_registry_time, DataNode, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const LEAF_ID: &str = "id";
pub const LEAF_DMI_SERVICE_NAME: &str = "dmi-service-name";
pub const LEAF_MODULE_SET_TAG: &str = "module-set-tag";
pub const LEAF_STATE: &str = "cm-handle-state";
pub const LEAF_LAST_UPDATE_TIME: &str = "last-update-time";
pub const LEAF_REASON: &str = "reason";
pub const LEAF_DETAILS: &str = "details";

/// A registered CM handle as read from the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CmHandle {
    pub id: String,
    pub dmi_service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_set_tag: Option<String>,
    pub state: CompositeState,
}

impl CmHandle {
    /// Module set tag of a pending upgrade, read from the lock details
    pub fn upgrade_target(&self) -> Option<String> {
        self.state
            .lock_reason()
            .filter(|r| r.reason.is_upgrade())
            .and_then(|r| LockDetails::parse(&r.details).module_set_tag)
    }
}

/// Registration request for a new CM handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCmHandle {
    pub id: String,
    pub dmi_service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_set_tag: Option<String>,
}

impl NewCmHandle {
    pub fn new(id: impl Into<String>, dmi_service_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dmi_service_name: dmi_service_name.into(),
            module_set_tag: None,
        }
    }

    pub fn with_module_set_tag(mut self, tag: impl Into<String>) -> Self {
        self.module_set_tag = Some(tag.into());
        self
    }

    /// `{"cm-handles": [ {...} ]}` payload for `create_child(root, ..)`
    pub fn to_registry_json(&self, state: &CompositeState, ts: &DateTime<Utc>) -> Value {
        let mut entry = Map::new();
        entry.insert(LEAF_ID.to_string(), json!(self.id));
        entry.insert(LEAF_DMI_SERVICE_NAME.to_string(), json!(self.dmi_service_name));
        if let Some(tag) = &self.module_set_tag {
            entry.insert(LEAF_MODULE_SET_TAG.to_string(), json!(tag));
        }
        entry.insert(STATE.to_string(), state_to_json(state, ts));
        json!({ CM_HANDLES: [Value::Object(entry)] })
    }
}

/// JSON for the `state` node
pub fn state_to_json(state: &CompositeState, ts: &DateTime<Utc>) -> Value {
    let mut obj = Map::new();
    obj.insert(LEAF_STATE.to_string(), json!(state.state().as_str()));
    obj.insert(LEAF_LAST_UPDATE_TIME.to_string(), json!(format_registry_time(ts)));
    if let Some(reason) = state.lock_reason() {
        obj.insert(LOCK_REASON.to_string(), lock_reason_to_json(reason));
    }
    Value::Object(obj)
}

/// JSON leaves of the `lock-reason` node
pub fn lock_reason_to_json(reason: &LockReason) -> Value {
    json!({
        LEAF_REASON: reason.reason.as_str(),
        LEAF_DETAILS: reason.details,
    })
}

/// Parse a `state` node (with descendants)
pub fn state_from_node(node: &DataNode) -> Result<CompositeState> {
    let state: CmHandleState = node
        .leaf_str(LEAF_STATE)
        .ok_or_else(|| Error::Validation(format!("{} has no {} leaf", node.xpath, LEAF_STATE)))?
        .parse()?;

    let lock_reason = node
        .child(LOCK_REASON)
        .map(|lock| -> Result<LockReason> {
            let reason = lock
                .leaf_str(LEAF_REASON)
                .ok_or_else(|| Error::Validation(format!("{} has no reason", lock.xpath)))?
                .parse()?;
            let details = lock.leaf_str(LEAF_DETAILS).unwrap_or_default();
            Ok(LockReason::new(reason, details))
        })
        .transpose()?;

    let mut composite = CompositeState::new(state, lock_reason)
        .map_err(|e| Error::Validation(format!("{}: {}", node.xpath, e)))?;
    if let Some(ts) = node.leaf_str(LEAF_LAST_UPDATE_TIME) {
        composite = composite.with_last_update_time(parse_registry_time(ts)?);
    }
    Ok(composite)
}

/// Parse a `cm-handles[@id=..]` node (with descendants)
pub fn handle_from_node(node: &DataNode) -> Result<CmHandle> {
    let id = node
        .leaf_str(LEAF_ID)
        .ok_or_else(|| Error::Validation(format!("{} has no id leaf", node.xpath)))?
        .to_string();
    let state_node = node
        .child(STATE)
        .ok_or_else(|| Error::Validation(format!("cm handle {} has no state", id)))?;

    Ok(CmHandle {
        dmi_service_name: node
            .leaf_str(LEAF_DMI_SERVICE_NAME)
            .unwrap_or_default()
            .to_string(),
        module_set_tag: node
            .leaf_str(LEAF_MODULE_SET_TAG)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        state: state_from_node(state_node)?,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LockReasonCategory;

    fn state_node(value: Value) -> DataNode {
        let obj = value.as_object().cloned().unwrap();
        let mut node = DataNode::new("/dmi-registry/cm-handles[@id='cmh-1']/state");
        for (k, v) in obj {
            if let Value::Object(child) = v {
                let mut c = DataNode::new(format!("{}/{}", node.xpath, k));
                c.leaves = child;
                node.children.push(c);
            } else {
                node.leaves.insert(k, v);
            }
        }
        node
    }

    #[test]
    fn test_state_json_round_trip() {
        let ts = Utc::now();
        let locked = CompositeState::locked(LockReason::new(
            LockReasonCategory::ModuleSyncFailed,
            "Attempt #1 failed: 404",
        ));
        let parsed = state_from_node(&state_node(state_to_json(&locked, &ts))).unwrap();
        assert!(parsed.same_state_as(&locked));
        assert_eq!(
            parsed.last_update_time().map(|t| t.timestamp_millis()),
            Some(ts.timestamp_millis())
        );
    }

    #[test]
    fn test_locked_without_reason_is_rejected() {
        let node = state_node(json!({ "cm-handle-state": "LOCKED" }));
        assert!(matches!(state_from_node(&node), Err(Error::Validation(_))));
    }

    #[test]
    fn test_registration_payload_shape() {
        let handle = NewCmHandle::new("cmh-1", "http://dmi:8080").with_module_set_tag("tag-a");
        let value = handle.to_registry_json(&CompositeState::advised(), &Utc::now());
        let entry = &value["cm-handles"][0];
        assert_eq!(entry["id"], "cmh-1");
        assert_eq!(entry["module-set-tag"], "tag-a");
        assert_eq!(entry["state"]["cm-handle-state"], "ADVISED");
        assert!(entry["state"].get("lock-reason").is_none());
    }
}

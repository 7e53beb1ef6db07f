//! DMI client trait and operation types

use async_trait::async_trait;
use cmsync_foundation::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Resource that triggers a module sync on the plugin
pub const MODULES_RESOURCE: &str = "modules";

/// HTTP method of a DMI operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DmiMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl DmiMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DmiMethod::Get => "GET",
            DmiMethod::Post => "POST",
            DmiMethod::Put => "PUT",
            DmiMethod::Patch => "PATCH",
            DmiMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for DmiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request against `<dmi>/<base>/v1/ch/<id>/<resource_id>`
#[derive(Debug, Clone, PartialEq)]
pub struct DmiOperation {
    pub method: DmiMethod,
    pub resource_id: String,
    pub query_params: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Caller's `Authorization` header, forwarded as is
    pub authorization: Option<String>,
}

impl DmiOperation {
    pub fn new(method: DmiMethod, resource_id: impl Into<String>) -> Self {
        Self {
            method,
            resource_id: resource_id.into(),
            query_params: Vec::new(),
            body: None,
            authorization: None,
        }
    }

    /// Module sync request for one handle
    pub fn module_sync(module_set_tag: Option<&str>) -> Self {
        let mut body = json!({ "cmHandleProperties": {} });
        if let Some(tag) = module_set_tag {
            body["moduleSetTag"] = json!(tag);
        }
        Self::new(DmiMethod::Post, MODULES_RESOURCE).with_body(body)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }
}

/// 2xx answer of a DMI plugin
#[derive(Debug, Clone, PartialEq)]
pub struct DmiResponse {
    pub status: u16,
    /// Parsed JSON body, `Null` when empty
    pub body: Value,
}

/// Access to DMI plugins
///
/// Non-2xx answers and transport failures come back as
/// `Error::ExternalCallFailed` with the matching `ExternalFailureKind`.
#[async_trait]
pub trait DmiClient: Send + Sync {
    async fn invoke(
        &self,
        dmi_service_name: &str,
        cm_handle_id: &str,
        operation: &DmiOperation,
    ) -> Result<DmiResponse>;

    /// Plugin health status (`"UP"`, ...); empty when unavailable
    async fn health(&self, dmi_service_name: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_sync_operation() {
        let op = DmiOperation::module_sync(Some("tag-a"));
        assert_eq!(op.method, DmiMethod::Post);
        assert_eq!(op.resource_id, "modules");
        assert_eq!(op.body.as_ref().unwrap()["moduleSetTag"], "tag-a");

        let op = DmiOperation::module_sync(None);
        assert!(op.body.as_ref().unwrap().get("moduleSetTag").is_none());
    }
}

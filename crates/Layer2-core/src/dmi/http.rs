//! reqwest based DMI client

use super::client::{DmiClient, DmiMethod, DmiOperation, DmiResponse};
use async_trait::async_trait;
use cmsync_foundation::{DmiAuthSettings, DmiSettings, Error, ExternalFailureKind, Result};
use reqwest::{header, Client, Method, Url};
use serde_json::Value;
use tracing::{debug, warn};

/// Longest slice of an error body kept in the failure message
const MAX_ERROR_BODY: usize = 512;

pub struct HttpDmiClient {
    client: Client,
    base_path: String,
    auth: DmiAuthSettings,
}

impl HttpDmiClient {
    pub fn new(settings: &DmiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.http_timeout())
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_path: settings.base_path.trim_matches('/').to_string(),
            auth: settings.auth.clone(),
        })
    }

    /// `<dmi>/<base>/v1/ch/<id>/<resource>`, with the id percent-encoded as one segment
    pub fn resource_url(&self, dmi_service_name: &str, cm_handle_id: &str, resource_id: &str) -> Result<Url> {
        let invalid = |reason: String| {
            Error::external(
                ExternalFailureKind::Unreachable,
                None,
                format!("invalid DMI url '{}': {}", dmi_service_name, reason),
            )
        };
        let mut url = Url::parse(dmi_service_name).map_err(|e| invalid(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| invalid("not a base url".to_string()))?;
            segments.pop_if_empty();
            segments.extend(self.base_path.split('/').filter(|s| !s.is_empty()));
            segments.extend(["v1", "ch"]);
            segments.push(cm_handle_id);
            segments.extend(resource_id.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn health_url(dmi_service_name: &str) -> String {
        format!("{}/actuator/health", dmi_service_name.trim_end_matches('/'))
    }

    fn method(method: DmiMethod) -> Method {
        match method {
            DmiMethod::Get => Method::GET,
            DmiMethod::Post => Method::POST,
            DmiMethod::Put => Method::PUT,
            DmiMethod::Patch => Method::PATCH,
            DmiMethod::Delete => Method::DELETE,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder, passthrough: Option<&str>) -> reqwest::RequestBuilder {
        match passthrough {
            Some(value) => request.header(header::AUTHORIZATION, value),
            None if self.auth.enabled => {
                request.basic_auth(&self.auth.username, Some(&self.auth.password))
            }
            None => request,
        }
    }
}

#[async_trait]
impl DmiClient for HttpDmiClient {
    async fn invoke(
        &self,
        dmi_service_name: &str,
        cm_handle_id: &str,
        operation: &DmiOperation,
    ) -> Result<DmiResponse> {
        let url = self.resource_url(dmi_service_name, cm_handle_id, &operation.resource_id)?;
        debug!(cm_handle_id, method = %operation.method, url = %url, "Calling DMI plugin");

        let mut request = self
            .client
            .request(Self::method(operation.method), url)
            .header(header::ACCEPT, "application/json");
        if !operation.query_params.is_empty() {
            request = request.query(&operation.query_params);
        }
        if let Some(body) = &operation.body {
            request = request.json(body);
        }
        request = self.authorize(request, operation.authorization.as_deref());

        let response = request.send().await.map_err(|e| {
            Error::external(
                ExternalFailureKind::Unreachable,
                None,
                format!("{} unreachable: {}", dmi_service_name, e),
            )
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            Error::external(
                ExternalFailureKind::Unreachable,
                Some(status.as_u16()),
                format!("failed to read response from {}: {}", dmi_service_name, e),
            )
        })?;

        if !status.is_success() {
            let kind = ExternalFailureKind::from_status(status.as_u16());
            let mut message = status.to_string();
            if !text.is_empty() {
                message.push_str(": ");
                message.extend(text.chars().take(MAX_ERROR_BODY));
            }
            return Err(Error::external(kind, Some(status.as_u16()), message));
        }

        // 2xx means the plugin accepted the request, whatever the body looks like
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(DmiResponse {
            status: status.as_u16(),
            body,
        })
    }

    async fn health(&self, dmi_service_name: &str) -> String {
        let request = self
            .client
            .get(Self::health_url(dmi_service_name))
            .header(header::ACCEPT, "application/json");
        let result = match self.authorize(request, None).send().await {
            Ok(response) if response.status().is_success() => response.json::<Value>().await,
            Ok(response) => {
                warn!(dmi = dmi_service_name, status = %response.status(), "DMI health check failed");
                return String::new();
            }
            Err(e) => {
                warn!(dmi = dmi_service_name, error = %e, "DMI health check failed");
                return String::new();
            }
        };
        result
            .ok()
            .and_then(|body| body.get("status").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_url() {
        let client = HttpDmiClient::new(&DmiSettings::default()).unwrap();
        assert_eq!(
            client.resource_url("http://dmi:8080/", "cmh-1", "modules").unwrap().as_str(),
            "http://dmi:8080/dmi/v1/ch/cmh-1/modules"
        );
        assert_eq!(
            client.resource_url("http://dmi:8080", "cmh-1", "").unwrap().as_str(),
            "http://dmi:8080/dmi/v1/ch/cmh-1"
        );
    }

    #[test]
    fn test_empty_base_path() {
        let settings = DmiSettings {
            base_path: String::new(),
            ..DmiSettings::default()
        };
        let client = HttpDmiClient::new(&settings).unwrap();
        assert_eq!(
            client.resource_url("http://dmi", "cmh-1", "modules").unwrap().as_str(),
            "http://dmi/v1/ch/cmh-1/modules"
        );
    }

    #[test]
    fn test_id_is_one_encoded_segment() {
        let client = HttpDmiClient::new(&DmiSettings::default()).unwrap();
        let url = client.resource_url("http://dmi", "cmh-1#x?y=1", "modules").unwrap();
        assert_eq!(url.path(), "/dmi/v1/ch/cmh-1%23x%3Fy=1/modules");
        assert!(url.fragment().is_none());
        assert!(url.query().is_none());
    }

    #[test]
    fn test_invalid_dmi_url() {
        let client = HttpDmiClient::new(&DmiSettings::default()).unwrap();
        let err = client.resource_url("not a url", "cmh-1", "modules").unwrap_err();
        assert!(matches!(
            err,
            Error::ExternalCallFailed {
                kind: ExternalFailureKind::Unreachable,
                ..
            }
        ));
    }
}

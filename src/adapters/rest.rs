//! REST client for the remote storage-management API
//!
//! One [`RestStorageApi`] per pass, bound to the cluster management host and
//! the cluster-admin credential. Requests use HTTP basic auth over https.

use crate::domain::credentials::{ClusterAdmin, Credentials};
use crate::domain::host::ManagementHost;
use crate::domain::ports::{StorageApi, StorageApiConnector};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

// =============================================================================
// Connector
// =============================================================================

/// Builds REST clients for management hosts
#[derive(Debug, Clone)]
pub struct RestConnector {
    /// Overall request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Skip TLS certificate verification (self-signed cluster certificates)
    pub accept_invalid_certs: bool,
}

impl Default for RestConnector {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            accept_invalid_certs: false,
        }
    }
}

#[async_trait]
impl StorageApiConnector for RestConnector {
    async fn connect(
        &self,
        host: &ManagementHost,
        credentials: &Credentials<ClusterAdmin>,
    ) -> Result<Arc<dyn StorageApi>> {
        let client = Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::limited(5))
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .build()?;

        debug!(host = %host, user = credentials.username(), "Connected to management API");
        Ok(Arc::new(RestStorageApi {
            client,
            base_url: host.base_url(),
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
        }))
    }
}

// =============================================================================
// Client
// =============================================================================

/// Authenticated JSON client for one management host
pub struct RestStorageApi {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl RestStorageApi {
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        trace!(%method, %url, "Remote request");

        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(error_from_response(path, status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text).map_err(|e| Error::UnexpectedResponse {
            path: path.to_string(),
            reason: format!("body is not JSON: {}", e),
        })
    }
}

#[async_trait]
impl StorageApi for RestStorageApi {
    async fn get(&self, path: &str) -> Result<Value> {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::PATCH, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.send(Method::DELETE, path, None).await
    }
}

/// Map a non-success response to an error.
///
/// The API reports failures as `{"error": {"message": ..., "code": ...}}`
/// where `code` is a string or a number.
pub fn error_from_response(path: &str, status: StatusCode, body: &str) -> Error {
    if status == StatusCode::NOT_FOUND {
        return Error::RemoteNotFound {
            path: path.to_string(),
        };
    }

    let envelope = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").cloned());
    let message = envelope
        .as_ref()
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                trimmed.to_string()
            }
        });
    let code = envelope.as_ref().and_then(|e| e.get("code")).and_then(|c| match c {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Error::RemoteApi {
        status: status.as_u16(),
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_not_found_maps_to_remote_not_found() {
        let err = error_from_response("/api/svm/svms/x", StatusCode::NOT_FOUND, "");
        assert_matches!(err, Error::RemoteNotFound { ref path } if path == "/api/svm/svms/x");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_envelope_is_parsed() {
        let body = r#"{"error": {"message": "duplicate entry", "code": "13001"}}"#;
        let err = error_from_response("/api/svm/svms", StatusCode::CONFLICT, body);
        assert_matches!(
            err,
            Error::RemoteApi { status: 409, code: Some(ref c), ref message }
                if c == "13001" && message == "duplicate entry"
        );
    }

    #[test]
    fn test_numeric_error_code() {
        let body = r#"{"error": {"message": "not allowed", "code": 262179}}"#;
        let err = error_from_response("/api/cluster", StatusCode::BAD_REQUEST, body);
        assert_matches!(err, Error::RemoteApi { code: Some(ref c), .. } if c == "262179");
    }

    #[test]
    fn test_plain_body_and_empty_body() {
        let err = error_from_response("/api/cluster", StatusCode::BAD_GATEWAY, "upstream down");
        assert_matches!(err, Error::RemoteApi { status: 502, code: None, ref message } if message == "upstream down");

        let err = error_from_response("/api/cluster", StatusCode::SERVICE_UNAVAILABLE, "");
        assert_matches!(err, Error::RemoteApi { ref message, .. } if message == "Service Unavailable");
    }

    #[tokio::test]
    async fn test_connector_builds_client_for_host() {
        let connector = RestConnector {
            accept_invalid_certs: true,
            ..Default::default()
        };
        let host = ManagementHost::parse("cluster.example.com:8443").unwrap();
        let credentials = Credentials::<ClusterAdmin>::new("admin", "secret");
        assert!(connector.connect(&host, &credentials).await.is_ok());
    }
}

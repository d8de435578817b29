//! Hosted backend: managed database row + managed object storage.
//!
//! Metadata lives as one row per session in a PostgREST-style table
//! (`?name=eq.{name}` filters, upsert via `Prefer: resolution=merge-duplicates`),
//! which makes listing a single query instead of a blob enumeration.
//! Payloads live in the service's object storage under the shared remote
//! key layout. The retry policy and error classification match the S3
//! backend, so caller-visible behavior differs only in the
//! `storage_location` format.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ensure_not_expired, payload_key, StorageBackend};
use crate::config::{BackendKind, HostedConfig, RetryPolicy, VaultConfig};
use crate::error::{Result, VaultError};
use crate::metadata::{SessionMetadata, SessionStatus};
use crate::retry::with_retry;

/// One failed HTTP exchange, classified for the retry predicate.
#[derive(Debug)]
struct HttpFailure {
    status: Option<StatusCode>,
    message: String,
}

impl std::fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl HttpFailure {
    /// 5xx and 429 responses are transient, as are transport-level
    /// failures (no status at all: connect errors, timeouts). Remaining
    /// 4xx responses are permanent.
    fn is_transient(&self) -> bool {
        match self.status {
            Some(status) => status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            None => true,
        }
    }
}

impl From<reqwest::Error> for HttpFailure {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

pub struct HostedBackend {
    client: Client,
    config: HostedConfig,
    retry: RetryPolicy,
}

impl HostedBackend {
    pub fn new(config: HostedConfig, retry: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&config.api_key).map_err(|_| {
            VaultError::InvalidArgument("hosted api_key contains invalid header bytes".to_string())
        })?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|_| {
            VaultError::InvalidArgument("hosted api_key contains invalid header bytes".to_string())
        })?;
        headers.insert("apikey", api_key);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .timeout(VaultConfig::REQUEST_TIMEOUT)
            .user_agent(concat!("session-vault/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| VaultError::backend("hosted_client", e))?;

        Ok(Self {
            client,
            config,
            retry,
        })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.table
        )
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.bucket,
            payload_key(name)
        )
    }

    fn location(&self, name: &str) -> String {
        format!("hosted://{}/{}", self.config.bucket, payload_key(name))
    }

    /// Run one request attempt, turning non-2xx responses into classified
    /// failures. `allow_missing` lets 404 through as `None` for reads and
    /// idempotent deletes.
    async fn execute(
        request: RequestBuilder,
        allow_missing: bool,
    ) -> std::result::Result<Option<reqwest::Response>, HttpFailure> {
        let response = request.send().await.map_err(HttpFailure::from)?;
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        if allow_missing && status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let message = response.text().await.unwrap_or_default();
        Err(HttpFailure {
            status: Some(status),
            message,
        })
    }

    /// Retry-wrapped request. `build` constructs a fresh request for every
    /// attempt so no body cloning is needed.
    async fn send<F>(
        &self,
        operation: &str,
        allow_missing: bool,
        build: F,
    ) -> Result<Option<reqwest::Response>>
    where
        F: Fn() -> RequestBuilder,
    {
        with_retry(operation, &self.retry, HttpFailure::is_transient, || {
            Self::execute(build(), allow_missing)
        })
        .await
        .map_err(|e| VaultError::backend_msg(operation, e.to_string()))
    }

    /// Like `send` with `allow_missing = false`: a success is always a
    /// response.
    async fn send_expecting_response<F>(
        &self,
        operation: &str,
        build: F,
    ) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        self.send(operation, false, build).await?.ok_or_else(|| {
            VaultError::backend_msg(operation, "response missing on success status")
        })
    }

    async fn fetch_rows(
        &self,
        operation: &str,
        query: Vec<(String, String)>,
    ) -> Result<Vec<SessionMetadata>> {
        let response = self
            .send_expecting_response(operation, || {
                self.client
                    .request(Method::GET, self.table_url())
                    .query(&query)
            })
            .await?;
        response
            .json::<Vec<SessionMetadata>>()
            .await
            .map_err(|e| VaultError::backend_msg(operation, format!("malformed row set: {e}")))
    }

    fn name_filter(name: &str) -> Vec<(String, String)> {
        vec![
            ("select".to_string(), "*".to_string()),
            ("name".to_string(), format!("eq.{name}")),
        ]
    }
}

#[async_trait]
impl StorageBackend for HostedBackend {
    async fn save_session(
        &self,
        name: &str,
        payload: &[u8],
        metadata: &SessionMetadata,
    ) -> Result<String> {
        let location = self.location(name);
        let stored = metadata.with_storage(BackendKind::Hosted.to_string(), &location);

        // Payload object first, then the row; the row landing second marks
        // the record complete, mirroring the local backend's write order.
        self.send_expecting_response("save_session", || {
            self.client
                .request(Method::POST, self.object_url(name))
                .header("x-upsert", "true")
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(payload.to_vec())
        })
        .await?;

        self.send_expecting_response("save_session", || {
            self.client
                .request(Method::POST, self.table_url())
                .query(&[("on_conflict", "name")])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&stored)
        })
        .await?;

        debug!(name, location = %location, "saved session to hosted backend");
        Ok(location)
    }

    async fn load_session(&self, name: &str) -> Result<(Vec<u8>, SessionMetadata)> {
        // Row first: it is small and carries the TTL, so an expired record
        // never costs a payload download.
        let rows = self
            .fetch_rows("load_session", Self::name_filter(name))
            .await?;
        let Some(metadata) = rows.into_iter().next() else {
            return Err(VaultError::not_found(name));
        };
        ensure_not_expired(&metadata)?;

        let Some(response) = self
            .send("load_session", true, || {
                self.client.request(Method::GET, self.object_url(name))
            })
            .await?
        else {
            // Row present but payload object missing: internal
            // inconsistency, reported with the uniform not-found contract.
            warn!(name, "metadata row present but payload object missing");
            return Err(VaultError::not_found(name));
        };
        let payload = response
            .bytes()
            .await
            .map_err(|e| VaultError::backend("load_session", e))?;
        Ok((payload.to_vec(), metadata))
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct NameRow {
            name: String,
        }

        let response = self
            .send_expecting_response("list_sessions", || {
                self.client
                    .request(Method::GET, self.table_url())
                    .query(&[("select", "name"), ("order", "name.asc")])
            })
            .await?;
        let rows: Vec<NameRow> = response.json().await.map_err(|e| {
            VaultError::backend_msg("list_sessions", format!("malformed row set: {e}"))
        })?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    async fn delete_session(&self, name: &str) -> Result<bool> {
        let response = self
            .send_expecting_response("delete_session", || {
                self.client
                    .request(Method::DELETE, self.table_url())
                    .query(&[("name", &format!("eq.{name}"))])
                    .header("Prefer", "return=representation")
            })
            .await?;
        let deleted_rows: Vec<serde_json::Value> = response.json().await.map_err(|e| {
            VaultError::backend_msg("delete_session", format!("malformed row set: {e}"))
        })?;

        let deleted_object = self
            .send("delete_session", true, || {
                self.client.request(Method::DELETE, self.object_url(name))
            })
            .await?
            .is_some();

        let removed = !deleted_rows.is_empty() || deleted_object;
        debug!(name, removed, "delete_session on hosted backend");
        Ok(removed)
    }

    async fn get_session_metadata(&self, name: &str) -> Result<Option<SessionMetadata>> {
        let rows = self
            .fetch_rows("get_session_metadata", Self::name_filter(name))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn update_session_metadata(&self, name: &str, status: SessionStatus) -> Result<bool> {
        let patch = serde_json::json!({
            "status": status,
            "modified_at": chrono::Utc::now(),
        });
        let response = self
            .send_expecting_response("update_session_metadata", || {
                self.client
                    .request(Method::PATCH, self.table_url())
                    .query(&[("name", &format!("eq.{name}"))])
                    .header("Prefer", "return=representation")
                    .json(&patch)
            })
            .await?;
        let rows: Vec<serde_json::Value> = response.json().await.map_err(|e| {
            VaultError::backend_msg("update_session_metadata", format!("malformed row set: {e}"))
        })?;
        Ok(!rows.is_empty())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HostedBackend {
        HostedBackend::new(
            HostedConfig {
                base_url: "https://xyz.example.co/".to_string(),
                api_key: "service-key".to_string(),
                table: "sessions".to_string(),
                bucket: "sessions".to_string(),
            },
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn urls_are_built_from_config() {
        let backend = backend();
        assert_eq!(
            backend.table_url(),
            "https://xyz.example.co/rest/v1/sessions"
        );
        assert_eq!(
            backend.object_url("acme"),
            "https://xyz.example.co/storage/v1/object/sessions/sessions/acme/payload.bin"
        );
        assert_eq!(
            backend.location("acme"),
            "hosted://sessions/sessions/acme/payload.bin"
        );
    }

    #[test]
    fn transient_classification_matches_the_s3_contract() {
        let transport = HttpFailure {
            status: None,
            message: "connection refused".to_string(),
        };
        assert!(transport.is_transient());

        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            let failure = HttpFailure {
                status: Some(status),
                message: String::new(),
            };
            assert!(failure.is_transient(), "{status} should be transient");
        }

        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            let failure = HttpFailure {
                status: Some(status),
                message: String::new(),
            };
            assert!(!failure.is_transient(), "{status} should be permanent");
        }
    }

    #[test]
    fn invalid_api_key_bytes_are_rejected() {
        let result = HostedBackend::new(
            HostedConfig {
                base_url: "https://xyz.example.co".to_string(),
                api_key: "bad\nkey".to_string(),
                table: "sessions".to_string(),
                bucket: "sessions".to_string(),
            },
            RetryPolicy::default(),
        );
        assert!(matches!(result, Err(VaultError::InvalidArgument(_))));
    }
}

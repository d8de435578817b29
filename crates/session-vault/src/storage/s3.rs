//! S3-compatible object storage backend.
//!
//! Works against AWS as well as S3-compatible providers (Cloudflare R2,
//! MinIO): the literal region `"auto"` is passed through verbatim — those
//! providers expect it in place of a real region — and a custom endpoint
//! URL overrides the AWS default, with path-style addressing forced since
//! virtual-hosted buckets are an AWS-ism.
//!
//! Keys follow the shared remote layout, `sessions/{name}/payload.bin` and
//! `sessions/{name}/metadata.json`. Every call goes through the retry
//! utility with the SDK error classifier.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::{ensure_not_expired, metadata_key, payload_key, StorageBackend};
use crate::config::{BackendKind, RetryPolicy, S3Config};
use crate::error::{Result, VaultError};
use crate::metadata::{SessionMetadata, SessionStatus};
use crate::retry::with_retry;

pub struct S3Backend {
    client: Client,
    bucket: String,
    retry: RetryPolicy,
}

impl S3Backend {
    /// Build the SDK client from backend configuration. Credentials come
    /// from the SDK's own provider chain; this crate only carries the
    /// bucket, region, and endpoint.
    pub async fn new(config: S3Config, retry: RetryPolicy) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            retry,
        }
    }

    fn location(&self, name: &str) -> String {
        format!("s3://{}/sessions/{name}", self.bucket)
    }

    async fn put_object(&self, operation: &str, key: &str, body: Vec<u8>) -> Result<()> {
        with_retry(operation, &self.retry, |e| is_transient(e), || {
            let body = body.clone();
            async move {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(ByteStream::from(body))
                    .send()
                    .await
            }
        })
        .await
        .map_err(|e| wrap_sdk(operation, e))?;
        Ok(())
    }

    /// Fetch an object's bytes; `Ok(None)` when the key does not exist.
    async fn get_object(&self, operation: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let output = match with_retry(operation, &self.retry, |e| is_transient(e), || async {
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
        })
        .await
        {
            Ok(output) => output,
            Err(err) if is_missing_key(&err) => return Ok(None),
            Err(err) => return Err(wrap_sdk(operation, err)),
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| VaultError::backend(operation, e))?
            .into_bytes();
        Ok(Some(bytes.to_vec()))
    }

    /// Existence check via `HeadObject`; never downloads the body.
    async fn object_exists(&self, operation: &str, key: &str) -> Result<bool> {
        let result = with_retry(operation, &self.retry, |e| is_transient(e), || async {
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
        })
        .await;

        match result {
            Ok(_) => Ok(true),
            // HEAD 404s carry no error body, so the code may be absent;
            // check the modeled variant as well.
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_not_found())
                    || is_missing_key(&err) =>
            {
                Ok(false)
            }
            Err(err) => Err(wrap_sdk(operation, err)),
        }
    }

    async fn delete_object(&self, operation: &str, key: &str) -> Result<()> {
        with_retry(operation, &self.retry, |e| is_transient(e), || async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
        })
        .await
        .map_err(|e| wrap_sdk(operation, e))?;
        Ok(())
    }

    async fn fetch_metadata(&self, operation: &str, name: &str) -> Result<Option<SessionMetadata>> {
        let Some(bytes) = self.get_object(operation, &metadata_key(name)).await? else {
            return Ok(None);
        };
        let metadata = serde_json::from_slice(&bytes).map_err(|e| {
            VaultError::backend_msg(operation, format!("malformed metadata for {name}: {e}"))
        })?;
        Ok(Some(metadata))
    }

    async fn write_metadata(
        &self,
        operation: &str,
        name: &str,
        metadata: &SessionMetadata,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(metadata).map_err(|e| {
            VaultError::backend_msg(operation, format!("failed to serialize metadata: {e}"))
        })?;
        self.put_object(operation, &metadata_key(name), bytes).await
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn save_session(
        &self,
        name: &str,
        payload: &[u8],
        metadata: &SessionMetadata,
    ) -> Result<String> {
        let location = self.location(name);
        let stored = metadata.with_storage(BackendKind::S3.to_string(), &location);

        self.put_object("save_session", &payload_key(name), payload.to_vec())
            .await?;
        self.write_metadata("save_session", name, &stored).await?;

        debug!(name, location = %location, "saved session to s3 backend");
        Ok(location)
    }

    async fn load_session(&self, name: &str) -> Result<(Vec<u8>, SessionMetadata)> {
        // Metadata first: it is small and carries the TTL, so an expired
        // record never costs a payload download.
        let Some(metadata) = self.fetch_metadata("load_session", name).await? else {
            return Err(VaultError::not_found(name));
        };
        ensure_not_expired(&metadata)?;

        match self.get_object("load_session", &payload_key(name)).await? {
            Some(payload) => Ok((payload, metadata)),
            None => {
                // Metadata without its payload object is an internal
                // inconsistency; callers get the uniform not-found contract.
                warn!(name, "metadata object present but payload object missing");
                Err(VaultError::not_found(name))
            }
        }
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        let mut continuation: Option<String> = None;

        loop {
            let token = continuation.clone();
            let output = with_retry("list_sessions", &self.retry, |e| is_transient(e), || {
                let token = token.clone();
                async move {
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix("sessions/")
                        .delimiter("/")
                        .set_continuation_token(token)
                        .send()
                        .await
                }
            })
            .await
            .map_err(|e| wrap_sdk("list_sessions", e))?;

            for common_prefix in output.common_prefixes() {
                if let Some(name) = common_prefix
                    .prefix()
                    .and_then(|p| p.strip_prefix("sessions/"))
                    .map(|p| p.trim_end_matches('/'))
                {
                    if !name.is_empty() {
                        names.insert(name.to_string());
                    }
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names.into_iter().collect())
    }

    async fn delete_session(&self, name: &str) -> Result<bool> {
        let existed = self
            .object_exists("delete_session", &metadata_key(name))
            .await?
            || self
                .object_exists("delete_session", &payload_key(name))
                .await?;
        if !existed {
            return Ok(false);
        }

        self.delete_object("delete_session", &payload_key(name))
            .await?;
        self.delete_object("delete_session", &metadata_key(name))
            .await?;
        debug!(name, "deleted session from s3 backend");
        Ok(true)
    }

    async fn get_session_metadata(&self, name: &str) -> Result<Option<SessionMetadata>> {
        self.fetch_metadata("get_session_metadata", name).await
    }

    async fn update_session_metadata(&self, name: &str, status: SessionStatus) -> Result<bool> {
        let Some(metadata) = self
            .fetch_metadata("update_session_metadata", name)
            .await?
        else {
            return Ok(false);
        };
        let updated = metadata.with_status(status);
        self.write_metadata("update_session_metadata", name, &updated)
            .await?;
        Ok(true)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }
}

/// Whether an SDK failure is worth retrying: connection-level failures and
/// throttling/server-side error codes are transient, other service errors
/// (permission, missing bucket, missing key) are permanent.
fn is_transient<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(_) => err.code().is_some_and(is_transient_code),
        _ => false,
    }
}

fn is_transient_code(code: &str) -> bool {
    matches!(
        code,
        "InternalError"
            | "ServiceUnavailable"
            | "SlowDown"
            | "Throttling"
            | "ThrottlingException"
            | "RequestTimeout"
            | "TooManyRequests"
            | "RequestLimitExceeded"
    )
}

/// Missing-object service errors, uniform across get/head shapes.
fn is_missing_key<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    matches!(err.code(), Some("NoSuchKey" | "NotFound"))
}

fn wrap_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> VaultError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    let message = match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(code), None) => code.to_string(),
        _ => format!("{err:?}"),
    };
    VaultError::backend_msg(operation, message)
}

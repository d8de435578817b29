//! Storage backend protocol and its implementations.
//!
//! All backends implement the same semantics: payload and metadata are
//! persisted as two distinct artifacts so metadata can be inspected without
//! fetching the (possibly large) payload, `load_session` enforces TTL,
//! `get_session_metadata` does not (so inspection tools can look at an
//! expired record without raising), and `delete_session` is idempotent.

pub mod atomic;
pub mod hosted;
pub mod local;
pub mod s3;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::{BackendKind, VaultConfig};
use crate::error::{Result, VaultError};
use crate::metadata::{SessionMetadata, SessionStatus};

pub use hosted::HostedBackend;
pub use local::LocalBackend;
pub use s3::S3Backend;

/// Object key for a session payload under the shared remote layout.
pub(crate) fn payload_key(name: &str) -> String {
    format!("sessions/{name}/payload.bin")
}

/// Object key for a session metadata record under the shared remote layout.
pub(crate) fn metadata_key(name: &str) -> String {
    format!("sessions/{name}/metadata.json")
}

/// TTL short-circuit shared by every backend's `load_session`.
pub(crate) fn ensure_not_expired(metadata: &SessionMetadata) -> Result<()> {
    if metadata.is_expired(Utc::now()) {
        return Err(VaultError::expired(&metadata.name, "ttl exceeded"));
    }
    Ok(())
}

/// Common interface over the local, S3-compatible, and hosted backends.
///
/// Implementations must be indistinguishable to callers except for the
/// format of the `storage_location` they report.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist payload and metadata, returning an opaque location string
    /// for display. The stored metadata has `storage_backend` and
    /// `storage_location` filled in by the backend.
    async fn save_session(
        &self,
        name: &str,
        payload: &[u8],
        metadata: &SessionMetadata,
    ) -> Result<String>;

    /// Fetch ciphertext and metadata. Fails `NotFound` when no record
    /// exists and `Expired` when the TTL has elapsed; metadata is read
    /// first so an expired record never costs a payload fetch.
    async fn load_session(&self, name: &str) -> Result<(Vec<u8>, SessionMetadata)>;

    /// All stored session names, sorted.
    async fn list_sessions(&self) -> Result<Vec<String>>;

    /// Remove payload and metadata. Idempotent; returns whether anything
    /// was removed.
    async fn delete_session(&self, name: &str) -> Result<bool>;

    /// Metadata-only read with no TTL enforcement. `None` when absent.
    async fn get_session_metadata(&self, name: &str) -> Result<Option<SessionMetadata>>;

    /// Replace the record's status, refreshing `modified_at`. Returns
    /// `false` when no record exists to update.
    async fn update_session_metadata(&self, name: &str, status: SessionStatus) -> Result<bool>;

    /// Which backend this is; recorded into saved metadata.
    fn kind(&self) -> BackendKind;
}

/// Build the backend selected by `config`.
///
/// Called once per process by the vault facade; the instance is reused for
/// every subsequent operation.
pub async fn create_backend(config: &VaultConfig) -> Result<Box<dyn StorageBackend>> {
    match config.backend {
        BackendKind::Local => Ok(Box::new(LocalBackend::new(config.local.base_dir.clone()))),
        BackendKind::S3 => {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                VaultError::InvalidArgument(
                    "backend is \"s3\" but no s3 configuration was provided".to_string(),
                )
            })?;
            Ok(Box::new(
                S3Backend::new(s3.clone(), config.retry.clone()).await,
            ))
        }
        BackendKind::Hosted => {
            let hosted = config.hosted.as_ref().ok_or_else(|| {
                VaultError::InvalidArgument(
                    "backend is \"hosted\" but no hosted configuration was provided".to_string(),
                )
            })?;
            Ok(Box::new(HostedBackend::new(
                hosted.clone(),
                config.retry.clone(),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SessionDetails;

    #[test]
    fn remote_key_layout() {
        assert_eq!(payload_key("acme"), "sessions/acme/payload.bin");
        assert_eq!(metadata_key("acme"), "sessions/acme/metadata.json");
    }

    #[test]
    fn expired_record_is_rejected_by_helper() {
        let mut meta = SessionMetadata::new(
            "acme",
            String::new(),
            Some(chrono::Duration::hours(1)),
            SessionDetails::default(),
        );
        meta.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(matches!(
            ensure_not_expired(&meta),
            Err(VaultError::Expired { .. })
        ));

        let fresh = SessionMetadata::new(
            "acme",
            String::new(),
            Some(chrono::Duration::hours(1)),
            SessionDetails::default(),
        );
        assert!(ensure_not_expired(&fresh).is_ok());
    }
}

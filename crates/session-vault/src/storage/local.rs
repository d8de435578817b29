//! Local filesystem backend.
//!
//! Layout: one directory per session, `{base_dir}/{name}/payload.bin` plus
//! `{base_dir}/{name}/metadata.json`. Writes are atomic (temp + rename) and
//! the payload file is owner-only from creation.
//!
//! Older versions stored a single flat file `{base_dir}/{name}.session.enc`
//! with no metadata sidecar. Those records are still readable: metadata is
//! synthesized from filesystem timestamps with an empty checksum and no
//! expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{atomic, ensure_not_expired, StorageBackend};
use crate::config::BackendKind;
use crate::error::{Result, VaultError};
use crate::metadata::{SessionMetadata, SessionStatus};

/// File name suffix of the legacy flat-file layout.
const LEGACY_SUFFIX: &str = ".session.enc";
const PAYLOAD_FILE: &str = "payload.bin";
const METADATA_FILE: &str = "metadata.json";

pub struct LocalBackend {
    base_dir: PathBuf,
}

impl LocalBackend {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn session_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn payload_path(&self, name: &str) -> PathBuf {
        self.session_dir(name).join(PAYLOAD_FILE)
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.session_dir(name).join(METADATA_FILE)
    }

    fn legacy_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}{LEGACY_SUFFIX}"))
    }

    fn read_metadata(&self, name: &str) -> Result<Option<SessionMetadata>> {
        atomic::read_json("get_session_metadata", &self.metadata_path(name))
    }

    /// Metadata for a legacy flat-file record, built from filesystem stat.
    fn synthesize_legacy_metadata(&self, name: &str, path: &Path) -> Result<SessionMetadata> {
        let stat = fs::metadata(path).map_err(|e| VaultError::backend("load_session", e))?;
        let modified = stat
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let created = stat
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified);

        Ok(SessionMetadata {
            name: name.to_string(),
            checksum: String::new(),
            created_at: created,
            modified_at: modified,
            expires_at: None,
            domain: None,
            current_url: None,
            cookie_count: 0,
            cookie_domains: Vec::new(),
            status: SessionStatus::Active,
            storage_backend: BackendKind::Local.to_string(),
            storage_location: path.display().to_string(),
        })
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn save_session(
        &self,
        name: &str,
        payload: &[u8],
        metadata: &SessionMetadata,
    ) -> Result<String> {
        let location = self.session_dir(name).display().to_string();
        let stored = metadata.with_storage(BackendKind::Local.to_string(), &location);

        // Payload first; the metadata file landing second marks the record
        // complete for readers that check metadata before payload.
        atomic::write_payload("save_session", &self.payload_path(name), payload)?;
        atomic::write_json("save_session", &self.metadata_path(name), &stored)?;

        debug!(name, location = %location, "saved session to local backend");
        Ok(location)
    }

    async fn load_session(&self, name: &str) -> Result<(Vec<u8>, SessionMetadata)> {
        if let Some(metadata) = self.read_metadata(name)? {
            ensure_not_expired(&metadata)?;
            let payload = match fs::read(self.payload_path(name)) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    // Metadata without payload is an inconsistent record;
                    // callers get the uniform not-found contract.
                    warn!(name, "metadata present but payload missing");
                    return Err(VaultError::not_found(name));
                }
                Err(err) => return Err(VaultError::backend("load_session", err)),
            };
            return Ok((payload, metadata));
        }

        let legacy = self.legacy_path(name);
        if legacy.exists() {
            warn!(name, "loading legacy flat-file session without metadata");
            let metadata = self.synthesize_legacy_metadata(name, &legacy)?;
            let payload = fs::read(&legacy).map_err(|e| VaultError::backend("load_session", e))?;
            return Ok((payload, metadata));
        }

        Err(VaultError::not_found(name))
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(VaultError::backend("list_sessions", err)),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| VaultError::backend("list_sessions", e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let path = entry.path();
            if path.is_dir() {
                if path.join(METADATA_FILE).exists() || path.join(PAYLOAD_FILE).exists() {
                    names.insert(file_name.to_string());
                }
            } else if let Some(name) = file_name.strip_suffix(LEGACY_SUFFIX) {
                names.insert(name.to_string());
            }
        }

        Ok(names.into_iter().collect())
    }

    async fn delete_session(&self, name: &str) -> Result<bool> {
        let mut removed = false;

        let dir = self.session_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => removed = true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(VaultError::backend("delete_session", err)),
        }

        let legacy = self.legacy_path(name);
        match fs::remove_file(&legacy) {
            Ok(()) => removed = true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(VaultError::backend("delete_session", err)),
        }

        debug!(name, removed, "delete_session on local backend");
        Ok(removed)
    }

    async fn get_session_metadata(&self, name: &str) -> Result<Option<SessionMetadata>> {
        if let Some(metadata) = self.read_metadata(name)? {
            return Ok(Some(metadata));
        }
        let legacy = self.legacy_path(name);
        if legacy.exists() {
            return Ok(Some(self.synthesize_legacy_metadata(name, &legacy)?));
        }
        Ok(None)
    }

    async fn update_session_metadata(&self, name: &str, status: SessionStatus) -> Result<bool> {
        // Only directory-layout records carry a metadata artifact; a status
        // write on a legacy flat file would silently migrate it, so it is
        // reported as "nothing to update".
        let Some(metadata) = self.read_metadata(name)? else {
            return Ok(false);
        };
        let updated = metadata.with_status(status);
        atomic::write_json("update_session_metadata", &self.metadata_path(name), &updated)?;
        Ok(true)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SessionDetails;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> LocalBackend {
        LocalBackend::new(dir.path().to_path_buf())
    }

    fn meta(name: &str) -> SessionMetadata {
        SessionMetadata::new(
            name,
            "00".repeat(32),
            Some(chrono::Duration::hours(1)),
            SessionDetails::default(),
        )
    }

    /// A record whose TTL elapsed an hour ago, as if loaded later.
    fn expired_meta(name: &str) -> SessionMetadata {
        let mut meta = meta(name);
        meta.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        meta
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        let location = backend
            .save_session("acme", b"ciphertext", &meta("acme"))
            .await
            .unwrap();
        assert!(location.contains("acme"));

        let (payload, loaded) = backend.load_session("acme").await.unwrap();
        assert_eq!(payload, b"ciphertext");
        assert_eq!(loaded.name, "acme");
        assert_eq!(loaded.storage_backend, "local");
        assert_eq!(loaded.storage_location, location);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            backend(&dir).load_session("ghost").await,
            Err(VaultError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn expired_record_short_circuits_before_payload_read() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend
            .save_session("acme", b"ciphertext", &expired_meta("acme"))
            .await
            .unwrap();
        // Remove the payload: expiry must be detected from metadata alone.
        fs::remove_file(backend.payload_path("acme")).unwrap();
        assert!(matches!(
            backend.load_session("acme").await,
            Err(VaultError::Expired { .. })
        ));
    }

    #[tokio::test]
    async fn metadata_without_payload_maps_to_not_found() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend
            .save_session("acme", b"ciphertext", &meta("acme"))
            .await
            .unwrap();
        fs::remove_file(backend.payload_path("acme")).unwrap();
        assert!(matches!(
            backend.load_session("acme").await,
            Err(VaultError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn legacy_flat_file_synthesizes_metadata() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        fs::write(dir.path().join("oldsite.session.enc"), b"legacy bytes").unwrap();

        let (payload, metadata) = backend.load_session("oldsite").await.unwrap();
        assert_eq!(payload, b"legacy bytes");
        assert_eq!(metadata.checksum, "");
        assert!(metadata.expires_at.is_none());
        assert_eq!(metadata.status, SessionStatus::Active);

        // Metadata-only read sees it too.
        let peeked = backend.get_session_metadata("oldsite").await.unwrap();
        assert!(peeked.unwrap().is_legacy());
    }

    #[tokio::test]
    async fn list_unions_directory_and_legacy_layouts_sorted() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend
            .save_session("bravo", b"x", &meta("bravo"))
            .await
            .unwrap();
        fs::write(dir.path().join("alpha.session.enc"), b"y").unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"z").unwrap();

        assert_eq!(
            backend.list_sessions().await.unwrap(),
            vec!["alpha".to_string(), "bravo".to_string()]
        );
    }

    #[tokio::test]
    async fn list_on_missing_base_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path().join("does-not-exist"));
        assert!(backend.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent_across_both_layouts() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend
            .save_session("acme", b"x", &meta("acme"))
            .await
            .unwrap();
        fs::write(dir.path().join("acme.session.enc"), b"legacy").unwrap();

        assert!(backend.delete_session("acme").await.unwrap());
        assert!(!backend.delete_session("acme").await.unwrap());
        assert!(!backend.delete_session("missing").await.unwrap());
    }

    #[tokio::test]
    async fn update_status_refreshes_modified_at() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend
            .save_session("acme", b"x", &meta("acme"))
            .await
            .unwrap();
        let before = backend
            .get_session_metadata("acme")
            .await
            .unwrap()
            .unwrap();

        assert!(backend
            .update_session_metadata("acme", SessionStatus::LoggedOut)
            .await
            .unwrap());
        let after = backend
            .get_session_metadata("acme")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, SessionStatus::LoggedOut);
        assert!(after.modified_at >= before.modified_at);
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test]
    async fn update_status_on_missing_or_legacy_record_is_false() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        assert!(!backend
            .update_session_metadata("ghost", SessionStatus::Active)
            .await
            .unwrap());

        fs::write(dir.path().join("oldsite.session.enc"), b"legacy").unwrap();
        assert!(!backend
            .update_session_metadata("oldsite", SessionStatus::LoggedOut)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn metadata_peek_does_not_enforce_ttl() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend
            .save_session("acme", b"x", &expired_meta("acme"))
            .await
            .unwrap();
        // load refuses, metadata peek still works.
        assert!(matches!(
            backend.load_session("acme").await,
            Err(VaultError::Expired { .. })
        ));
        assert!(backend
            .get_session_metadata("acme")
            .await
            .unwrap()
            .is_some());
    }
}

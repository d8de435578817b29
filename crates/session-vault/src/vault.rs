//! The vault facade: encryption + checksum + TTL + backend in one place.
//!
//! External collaborators (CLI, keepalive daemon, analysis tools) only ever
//! talk to [`SessionVault`]. Its contract is deliberately narrow: opaque
//! bytes in, opaque bytes out, with every failure mode normalized to the
//! small taxonomy in [`crate::error::VaultError`].

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{BackendKind, VaultConfig};
use crate::crypto::EncryptionService;
use crate::error::{Result, VaultError};
use crate::metadata::{validate_name, SessionDetails, SessionMetadata, SessionStatus};
use crate::storage::{create_backend, StorageBackend};

/// Encrypted session cache over one storage backend.
///
/// Construct once at process start and reuse: the constructor resolves the
/// backend and loads (or creates) the encryption key exactly once. The
/// vault holds no locks — it is built for one single-threaded process per
/// invocation, and concurrent use from multiple threads requires external
/// synchronization. Cross-process races resolve to last-writer-wins; atomic
/// write discipline in the backends guarantees a reader never observes a
/// partial record.
pub struct SessionVault {
    backend: Box<dyn StorageBackend>,
    crypto: EncryptionService,
    ttl: Option<chrono::Duration>,
}

impl SessionVault {
    /// Build the vault from configuration: selects the backend and loads
    /// or creates the encryption key.
    pub async fn new(config: &VaultConfig) -> Result<Self> {
        let backend = create_backend(config).await?;
        let crypto = EncryptionService::new(&config.key_path)?;
        debug!(backend = %backend.kind(), "session vault initialized");
        Ok(Self {
            backend,
            crypto,
            ttl: config.ttl(),
        })
    }

    /// Assemble a vault from already-built parts. Used by embedders that
    /// construct a custom backend (and by the backend parity tests).
    pub fn from_parts(
        backend: Box<dyn StorageBackend>,
        crypto: EncryptionService,
        ttl: Option<chrono::Duration>,
    ) -> Self {
        Self {
            backend,
            crypto,
            ttl,
        }
    }

    /// Encrypt and persist `plaintext` under `name`, returning the
    /// backend's display-only location string.
    ///
    /// The SHA-256 checksum of the plaintext is stored in the metadata as
    /// an integrity check independent of the encryption layer's own MAC.
    pub async fn save(
        &self,
        name: &str,
        plaintext: &[u8],
        details: SessionDetails,
    ) -> Result<String> {
        validate_name(name)?;
        let checksum = payload_checksum(plaintext);
        let token = match self.crypto.encrypt(plaintext) {
            Ok(token) => token,
            Err(VaultError::Crypto(reason)) => {
                return Err(VaultError::backend_msg("save_session", reason));
            }
            Err(other) => return Err(other),
        };
        let metadata = SessionMetadata::new(name, checksum, self.ttl, details);
        let location = self.backend.save_session(name, &token, &metadata).await?;
        debug!(name, location = %location, "session saved");
        Ok(location)
    }

    /// Load and decrypt the session stored under `name`.
    ///
    /// TTL expiry, decryption failure, and checksum mismatch all surface as
    /// [`VaultError::Expired`]: whatever the cause, the session can no
    /// longer be trusted and the caller must re-authenticate.
    pub async fn load(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;
        let (token, metadata) = self.backend.load_session(name).await?;

        let plaintext = match self.crypto.decrypt(&token) {
            Ok(plaintext) => plaintext,
            Err(VaultError::Crypto(reason)) => {
                warn!(name, reason, "stored session failed decryption");
                return Err(VaultError::expired(name, "decryption failed"));
            }
            Err(other) => return Err(other),
        };

        if metadata.is_legacy() {
            // Pre-checksum records: integrity rests on the encryption MAC
            // alone. Allowed, but loudly.
            warn!(name, "loading legacy session without plaintext checksum");
        } else {
            let actual = payload_checksum(&plaintext);
            if actual != metadata.checksum {
                warn!(name, "stored session failed checksum verification");
                return Err(VaultError::expired(name, "checksum mismatch"));
            }
        }

        Ok(plaintext)
    }

    /// Names of all stored sessions, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        self.backend.list_sessions().await
    }

    /// Remove the session and its metadata. Idempotent; returns whether
    /// anything was removed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        self.backend.delete_session(name).await
    }

    /// Metadata for `name` without fetching or decrypting the payload.
    /// Does not enforce TTL, so expired records remain inspectable.
    pub async fn metadata(&self, name: &str) -> Result<Option<SessionMetadata>> {
        validate_name(name)?;
        self.backend.get_session_metadata(name).await
    }

    /// Mark the session `active` or `logged_out`. Returns `false` when no
    /// record exists under `name`.
    pub async fn update_status(&self, name: &str, status: SessionStatus) -> Result<bool> {
        validate_name(name)?;
        self.backend.update_session_metadata(name, status).await
    }

    /// Which backend this vault was configured with.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }
}

// Unit tests live in tests/vault_tests.rs and tests/backend_parity.rs: the
// facade is only meaningfully exercised end to end against a backend.

/// Hex SHA-256 of a payload, as stored in `SessionMetadata::checksum`.
pub fn payload_checksum(plaintext: &[u8]) -> String {
    hex::encode(Sha256::digest(plaintext))
}

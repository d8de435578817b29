//! Error types for session-vault.
//!
//! The caller-facing taxonomy is deliberately small: every failure a caller
//! can act on is one of `NotFound`, `Expired`, `InvalidArgument`, or
//! `Backend`. `Crypto` exists for the encryption layer; the vault facade
//! normalizes it to `Expired` before it reaches a caller, since the
//! remediation ("re-authenticate") is the same.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Main error type for the session vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No session is stored under the given name.
    #[error("session not found: {name}")]
    NotFound { name: String },

    /// The session can no longer be trusted and must be re-created.
    ///
    /// Covers TTL expiry, decryption failure, and checksum mismatch — the
    /// caller's remediation is identical for all three, so they share one
    /// variant.
    #[error("session expired: {name} ({reason})")]
    Expired { name: String, reason: String },

    /// A malformed session name or status value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A storage backend failure: local I/O errors surface here directly,
    /// remote errors only after the retry budget is exhausted (or when the
    /// failure is permanent).
    #[error("backend operation {operation} failed: {message}")]
    Backend {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Encryption service failure. Internal; callers of the vault facade
    /// see this as `Expired` on the read path.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl VaultError {
    /// Build a `Backend` error wrapping an underlying failure.
    pub fn backend(
        operation: impl Into<String>,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        VaultError::Backend {
            operation: operation.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Build a `Backend` error from a bare message.
    pub fn backend_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        VaultError::Backend {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        VaultError::NotFound { name: name.into() }
    }

    pub fn expired(name: impl Into<String>, reason: impl Into<String>) -> Self {
        VaultError::Expired {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_preserves_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = VaultError::backend("save_session", io);
        assert!(err.to_string().contains("save_session"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn expired_mentions_reason() {
        let err = VaultError::expired("acme", "ttl exceeded");
        assert_eq!(
            err.to_string(),
            "session expired: acme (ttl exceeded)"
        );
    }
}

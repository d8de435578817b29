//! Session metadata model and its JSON form.
//!
//! `SessionMetadata` is immutable: status changes and backend placement go
//! through `with_status` / `with_storage`, which produce new instances. The
//! persisted JSON record is the cross-backend interchange format, so field
//! names here are stable.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{Result, VaultError};

/// Lifecycle status of a cached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    LoggedOut,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::LoggedOut => write!(f, "logged_out"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "logged_out" => Ok(SessionStatus::LoggedOut),
            other => Err(VaultError::InvalidArgument(format!(
                "invalid session status {other:?}; expected \"active\" or \"logged_out\""
            ))),
        }
    }
}

/// Descriptive fields supplied by the caller at save time. The vault stores
/// them verbatim; it never interprets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDetails {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default)]
    pub cookie_count: u32,
    #[serde(default)]
    pub cookie_domains: Vec<String>,
}

/// Immutable record describing one cached session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Safe identifier; used to build storage keys and paths.
    pub name: String,
    /// Hex SHA-256 of the plaintext payload. Empty string only on legacy
    /// records that predate checksumming — such records are loadable but
    /// carry no integrity protection beyond the encryption layer's MAC.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// `None` means the session never expires.
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default)]
    pub cookie_count: u32,
    #[serde(default)]
    pub cookie_domains: Vec<String>,
    pub status: SessionStatus,
    /// Set by the backend at save time; opaque to callers.
    #[serde(default)]
    pub storage_backend: String,
    /// Backend-specific location string, for display only. Never parsed.
    #[serde(default)]
    pub storage_location: String,
}

impl SessionMetadata {
    /// Build a fresh record with `created_at == modified_at == now` and
    /// `expires_at = now + ttl` (or never, when `ttl` is `None`).
    ///
    /// A negative `ttl` is clamped to zero so `expires_at >= created_at`
    /// always holds on a freshly built record.
    pub fn new(
        name: &str,
        checksum: String,
        ttl: Option<chrono::Duration>,
        details: SessionDetails,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            checksum,
            created_at: now,
            modified_at: now,
            expires_at: ttl.map(|ttl| now + ttl.max(chrono::Duration::zero())),
            domain: details.domain,
            current_url: details.current_url,
            cookie_count: details.cookie_count,
            cookie_domains: details.cookie_domains,
            status: SessionStatus::Active,
            storage_backend: String::new(),
            storage_location: String::new(),
        }
    }

    /// New instance with the status changed and `modified_at` refreshed.
    #[must_use]
    pub fn with_status(&self, status: SessionStatus) -> Self {
        Self {
            status,
            modified_at: Utc::now(),
            ..self.clone()
        }
    }

    /// New instance with the backend placement recorded.
    #[must_use]
    pub fn with_storage(&self, backend: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            storage_backend: backend.into(),
            storage_location: location.into(),
            ..self.clone()
        }
    }

    /// Whether the record's TTL has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }

    /// True for records that predate checksumming.
    pub fn is_legacy(&self) -> bool {
        self.checksum.is_empty()
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("static regex")
    })
}

/// Validate a session name for use in storage keys and filesystem paths.
///
/// Names must start with an alphanumeric and may contain only alphanumerics,
/// `.`, `_`, and `-`. Path separators and `..` sequences are rejected so a
/// name can never escape the backend's base directory or key prefix.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VaultError::InvalidArgument(
            "session name must not be empty".to_string(),
        ));
    }
    if !name_pattern().is_match(name) {
        return Err(VaultError::InvalidArgument(format!(
            "invalid session name {name:?}: only alphanumerics, '.', '_', '-' are allowed"
        )));
    }
    if name.contains("..") {
        return Err(VaultError::InvalidArgument(format!(
            "invalid session name {name:?}: '..' is not allowed"
        )));
    }
    Ok(())
}

//! Configuration for the session vault.
//!
//! All values are handed in by the embedding application; the vault never
//! reads environment variables or config files itself. The caller resolves
//! its own settings (CLI flags, env, dotfiles) and passes the result here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which storage backend the vault should use. Resolved once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local filesystem, no network dependency.
    Local,
    /// S3-compatible object storage (AWS, Cloudflare R2, MinIO).
    S3,
    /// Hosted service: managed database row + managed object storage.
    Hosted,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::S3 => write!(f, "s3"),
            BackendKind::Hosted => write!(f, "hosted"),
        }
    }
}

/// Retry behavior for remote backends. Local disk I/O is never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay before the second attempt.
    pub base_delay: Duration,
    /// Cap applied to the exponential backoff.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }
}

/// Local filesystem backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LocalConfig {
    /// Directory holding one subdirectory per session.
    pub base_dir: PathBuf,
}

/// S3-compatible backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct S3Config {
    pub bucket: String,
    /// AWS region name, or the literal `"auto"` for providers that do not
    /// use real regions (Cloudflare R2, MinIO).
    pub region: String,
    /// Custom endpoint URL overriding the default AWS endpoint.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

/// Hosted backend settings (managed database + managed object storage).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HostedConfig {
    /// Base URL of the hosted project, e.g. `https://xyz.example.co`.
    pub base_url: String,
    /// Service API key; sent as both `apikey` and bearer token.
    pub api_key: String,
    /// Metadata table name.
    #[serde(default = "default_hosted_table")]
    pub table: String,
    /// Object storage bucket for payloads.
    #[serde(default = "default_hosted_bucket")]
    pub bucket: String,
}

fn default_hosted_table() -> String {
    VaultConfig::DEFAULT_HOSTED_TABLE.to_string()
}

fn default_hosted_bucket() -> String {
    VaultConfig::DEFAULT_HOSTED_BUCKET.to_string()
}

/// Top-level vault configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VaultConfig {
    /// Which backend to use. Memoized for the process lifetime.
    pub backend: BackendKind,
    /// Session time-to-live in hours. `None` means sessions never expire.
    pub ttl_hours: Option<u32>,
    /// Retry policy for remote backends.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Path of the symmetric key file.
    pub key_path: PathBuf,
    /// Local backend settings. Always present; also used as scratch space
    /// for the key file's default location by embedding applications.
    pub local: LocalConfig,
    #[serde(default)]
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub hosted: Option<HostedConfig>,
}

impl VaultConfig {
    pub const DEFAULT_TTL_HOURS: u32 = 24;
    pub const DEFAULT_HOSTED_TABLE: &'static str = "sessions";
    pub const DEFAULT_HOSTED_BUCKET: &'static str = "sessions";
    /// Request timeout applied to hosted backend HTTP calls.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Convenience constructor for a local-only vault rooted at `base_dir`.
    pub fn local(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let key_path = base_dir.join("session.key");
        Self {
            backend: BackendKind::Local,
            ttl_hours: Some(Self::DEFAULT_TTL_HOURS),
            retry: RetryPolicy::default(),
            key_path,
            local: LocalConfig { base_dir },
            s3: None,
            hosted: None,
        }
    }

    /// TTL as a chrono duration, if sessions expire at all.
    pub fn ttl(&self) -> Option<chrono::Duration> {
        self.ttl_hours.map(|h| chrono::Duration::hours(i64::from(h)))
    }
}

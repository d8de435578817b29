//! session-vault — encrypted session cache with pluggable storage backends.
//!
//! Persists authenticated session state (cookies, headers, opaque
//! credential blobs) across process invocations so a scripted client can
//! reuse a login without repeating interactive authentication. Payloads are
//! sealed with authenticated encryption, checksummed, TTL-bounded, and
//! stored through one of three interchangeable backends: local filesystem,
//! S3-compatible object storage, or a hosted database+object-storage
//! service.
//!
//! The vault never interprets payload bytes; callers serialize their own
//! session structure and get the same bytes back.
//!
//! # Example
//!
//! ```rust,ignore
//! use session_vault::{SessionDetails, SessionVault, VaultConfig};
//!
//! #[tokio::main]
//! async fn main() -> session_vault::Result<()> {
//!     let config = VaultConfig::local("/home/me/.scraper/sessions");
//!     let vault = SessionVault::new(&config).await?;
//!
//!     vault.save("acme", b"cookie jar bytes", SessionDetails::default()).await?;
//!     let bytes = vault.load("acme").await?;
//!     assert_eq!(bytes, b"cookie jar bytes");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod metadata;
pub mod retry;
pub mod storage;

mod vault;

// Re-export commonly used types
pub use config::{BackendKind, HostedConfig, LocalConfig, RetryPolicy, S3Config, VaultConfig};
pub use crypto::EncryptionService;
pub use error::{Result, VaultError};
pub use metadata::{validate_name, SessionDetails, SessionMetadata, SessionStatus};
pub use storage::{create_backend, HostedBackend, LocalBackend, S3Backend, StorageBackend};
pub use vault::{payload_checksum, SessionVault};

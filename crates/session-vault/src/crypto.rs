//! Authenticated encryption for session payloads.
//!
//! Payloads are sealed as versioned tokens:
//!
//! ```text
//! [version: 1 byte][unix timestamp: 8 bytes BE][nonce: 12 bytes][AES-256-GCM ciphertext + tag]
//! ```
//!
//! The 21-byte header is bound as associated data, so flipping any bit of a
//! token — header or body — fails authentication. `decrypt` never returns
//! unauthenticated or partially decoded data.
//!
//! The symmetric key lives in a single file created with owner-only
//! permissions applied at open time, before any key bytes are written. Key
//! rotation is not supported; a new key file means existing tokens become
//! undecryptable and their sessions must be re-created.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::Utc;
use rand::RngCore;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Token format version. Bump when the layout changes.
const TOKEN_VERSION: u8 = 1;
/// version (1) + timestamp (8) + nonce (12).
const HEADER_LEN: usize = 21;
/// GCM authentication tag length.
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Owns the symmetric key lifecycle and seals/opens session payloads.
///
/// Construct once per process (the vault facade does this) so the key file
/// is read a single time.
pub struct EncryptionService {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl EncryptionService {
    /// Load the key at `key_path`, creating it if absent.
    ///
    /// A fresh key is generated from the OS RNG and persisted atomically:
    /// written to a temp file opened with mode 0600, then renamed into
    /// place. The file is never observable with wider permissions.
    pub fn new(key_path: &Path) -> Result<Self> {
        let key = match fs::read(key_path) {
            Ok(bytes) => {
                let bytes: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                    VaultError::Crypto(format!(
                        "key file {} is malformed: expected {KEY_LEN} bytes, found {}",
                        key_path.display(),
                        bytes.len()
                    ))
                })?;
                tracing::debug!(path = %key_path.display(), "loaded existing session key");
                Zeroizing::new(bytes)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let key = generate_key();
                write_key_file(key_path, &key)?;
                tracing::info!(path = %key_path.display(), "generated new session key");
                key
            }
            Err(err) => return Err(VaultError::backend("read_key", err)),
        };

        Ok(Self { key })
    }

    /// Seal `plaintext` into a versioned authenticated token.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut header = [0u8; HEADER_LEN];
        header[0] = TOKEN_VERSION;
        let timestamp = Utc::now().timestamp().max(0) as u64;
        header[1..9].copy_from_slice(&timestamp.to_be_bytes());
        rand::rng().fill_bytes(&mut header[9..9 + NONCE_LEN]);

        let cipher = Aes256Gcm::new_from_slice(self.key.as_ref())
            .map_err(|_| VaultError::Crypto("invalid key length".to_string()))?;
        let nonce = Nonce::from_slice(&header[9..9 + NONCE_LEN]);
        let body = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|_| VaultError::Crypto("encryption failed".to_string()))?;

        let mut token = Vec::with_capacity(HEADER_LEN + body.len());
        token.extend_from_slice(&header);
        token.extend_from_slice(&body);
        Ok(token)
    }

    /// Open a token, verifying the MAC before returning anything.
    ///
    /// Any malformed or tampered token fails with a `Crypto` error; the
    /// vault facade maps that to `Expired` for callers.
    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>> {
        if token.len() < HEADER_LEN + TAG_LEN {
            return Err(VaultError::Crypto("token too short".to_string()));
        }
        if token[0] != TOKEN_VERSION {
            return Err(VaultError::Crypto(format!(
                "unsupported token version {}",
                token[0]
            )));
        }

        let (header, body) = token.split_at(HEADER_LEN);
        let cipher = Aes256Gcm::new_from_slice(self.key.as_ref())
            .map_err(|_| VaultError::Crypto("invalid key length".to_string()))?;
        let nonce = Nonce::from_slice(&header[9..9 + NONCE_LEN]);
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: body,
                    aad: header,
                },
            )
            .map_err(|_| VaultError::Crypto("decryption failed: token is tampered or was sealed with a different key".to_string()))
    }
}

fn generate_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    rand::rng().fill_bytes(key.as_mut());
    key
}

/// Persist key material atomically with owner-only permissions.
///
/// The mode is set when the temp file is opened, not chmod'd afterward, so
/// there is no window where the key is world-readable.
fn write_key_file(path: &Path, key: &[u8; KEY_LEN]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| VaultError::backend("write_key", e))?;
        }
    }

    let temp_path = temp_sibling(path);
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(&temp_path)
        .map_err(|e| VaultError::backend("write_key", e))?;
    file.write_all(key)
        .and_then(|()| file.sync_all())
        .map_err(|e| VaultError::backend("write_key", e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| VaultError::backend("write_key", e))?;
    Ok(())
}

/// Unique temp path next to `path` so the final rename stays on one filesystem.
fn temp_sibling(path: &Path) -> PathBuf {
    let pid = std::process::id();
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{pid}.tmp"));
    path.with_file_name(name)
}

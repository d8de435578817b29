//! Atomic file operations for the local backend.
//!
//! Writes go to a temp file with a unique PID+TID suffix, are fsync'd, and
//! are renamed into place. A concurrent reader therefore sees either the
//! previous complete file or the new complete file, never a partial write —
//! last-writer-wins at the whole-file level, which is the concurrency
//! contract for this subsystem.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use tracing::debug;

use crate::error::{Result, VaultError};

/// Read and parse a JSON file. Returns `None` if the file doesn't exist.
pub fn read_json<T: DeserializeOwned>(operation: &str, path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(VaultError::backend(operation, err)),
    };

    let data = serde_json::from_str(&contents).map_err(|e| {
        VaultError::backend_msg(
            operation,
            format!("failed to parse {}: {e}", path.display()),
        )
    })?;
    Ok(Some(data))
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize>(operation: &str, path: &Path, data: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(data).map_err(|e| {
        VaultError::backend_msg(operation, format!("failed to serialize metadata: {e}"))
    })?;
    write_bytes(operation, path, serialized.as_bytes(), false)
}

/// Write raw bytes atomically with owner-only permissions.
///
/// The 0600 mode is set when the temp file is created, not chmod'd after the
/// fact, so the payload is never briefly world-readable.
pub fn write_payload(operation: &str, path: &Path, data: &[u8]) -> Result<()> {
    write_bytes(operation, path, data, true)
}

fn write_bytes(operation: &str, path: &Path, data: &[u8], owner_only: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| VaultError::backend(operation, e))?;
        }
    }

    let temp_path = temp_path_for(path);
    {
        let mut options = OpenOptions::new();
        // The temp name is unique per process+thread, so a pre-existing file
        // can only be a crashed earlier attempt; truncate it.
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if owner_only {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        #[cfg(not(unix))]
        let _ = owner_only;

        let mut file: File = options
            .open(&temp_path)
            .map_err(|e| VaultError::backend(operation, e))?;
        file.write_all(data)
            .and_then(|()| file.sync_all())
            .map_err(|e| VaultError::backend(operation, e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| VaultError::backend(operation, e))?;
    debug!(path = %path.display(), "atomically wrote file");
    Ok(())
}

/// Unique temp file name next to `path`: rename is only atomic within one
/// filesystem, and PID+TID keeps concurrent processes from colliding.
fn temp_path_for(path: &Path) -> PathBuf {
    let pid = process::id();
    let tid = thread_id();
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{pid}.{tid}.tmp"));
    path.with_file_name(name)
}

fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    format!("{:?}", thread::current().id()).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn write_and_read_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        let data = TestData {
            name: "acme".to_string(),
            value: 42,
        };

        write_json("test", &path, &data).unwrap();
        let read: Option<TestData> = read_json("test", &path).unwrap();
        assert_eq!(read, Some(data));
    }

    #[test]
    fn read_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let read: Option<TestData> = read_json("test", &dir.path().join("nope.json")).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn read_corrupt_json_is_backend_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        fs::write(&path, b"{not json").unwrap();
        let read: Result<Option<TestData>> = read_json("test", &path);
        assert!(matches!(read, Err(VaultError::Backend { .. })));
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("meta.json");
        write_json("test", &path, &TestData { name: "n".into(), value: 1 }).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn overwrite_replaces_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        write_payload("test", &path, b"first version, longer").unwrap();
        write_payload("test", &path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        write_payload("test", &path, b"data").unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("payload.bin")]);
    }

    #[cfg(unix)]
    #[test]
    fn payload_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        write_payload("test", &path, b"secret").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

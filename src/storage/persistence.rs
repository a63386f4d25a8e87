//! File-backed cache: one JSON document per namespace.

use super::CacheBackend;
use crate::core::{Result, SyncError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const FILE_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileCacheBackend {
    dir: PathBuf,
}

impl FileCacheBackend {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            SyncError::IoError(format!(
                "Failed to create cache directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_key(key), FILE_EXTENSION))
    }
}

impl CacheBackend for FileCacheBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::IoError(format!(
                "Failed to read cache file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    /// Writes through a temp file in the same directory, then renames over the target.
    fn write(&self, key: &str, payload: &str) -> Result<()> {
        let path = self.path_for(key);
        let mut temp = NamedTempFile::new_in(&self.dir).map_err(|e| {
            SyncError::IoError(format!("Failed to create temp file in '{}': {}", self.dir.display(), e))
        })?;
        temp.write_all(payload.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| SyncError::IoError(format!("Failed to write cache payload: {}", e)))?;
        temp.persist(&path).map_err(|e| {
            SyncError::IoError(format!(
                "Failed to rename temp file -> '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::IoError(format!(
                "Failed to remove cache file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            SyncError::IoError(format!(
                "Failed to list cache directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(decode_key)
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key).is_file())
    }
}

/// Percent-encodes everything except ASCII alphanumerics, `-` and `_`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

//! Sidecar metadata read/write (spec.md §4.3, §6).

use crate::error::StorageError;
use crate::series::Metadata;
use std::fs;
use std::path::Path;

pub fn write(path: &Path, metadata: &Metadata) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| StorageError::FileCorrupted(format!("metadata serialization: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| StorageError::PermissionDenied(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StorageError::PermissionDenied(format!("atomic rename failed: {e}"))
    })
}

pub fn read(path: &Path) -> Result<Metadata, StorageError> {
    if !path.is_file() {
        return Err(StorageError::FileNotFound(path.display().to_string()));
    }
    let content = fs::read_to_string(path).map_err(|e| StorageError::PermissionDenied(e.to_string()))?;
    serde_json::from_str(&content)
        .map_err(|e| StorageError::FileCorrupted(format!("metadata parse: {e}")))
}

//! JSON snapshot files
//!
//! A snapshot directory holds one `<name>.json` file per stored value.
//! Writes go to a sibling `.tmp` file that is synced and renamed into place,
//! so a crash mid-write never leaves a truncated snapshot behind and a
//! leftover temp file is never mistaken for a snapshot.

use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

const SNAPSHOT_EXTENSION: &str = "json";

/// JSON store errors
#[derive(Debug, Error)]
pub enum JsonStoreError {
    /// Reading, writing or renaming failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The value could not be encoded or the file could not be decoded
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No snapshot at the requested path
    #[error("File not found: {path}")]
    NotFound { path: String },
}

/// Result type for JSON store operations
pub type JsonStoreResult<T> = Result<T, JsonStoreError>;

/// Load a snapshot
pub fn load_json<T, P>(path: P) -> JsonStoreResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(JsonStoreError::NotFound {
                path: path.display().to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content)?)
}

/// Save a snapshot atomically (write and sync a temp file, then rename)
pub fn save_json_atomic<T, P>(path: P, value: &T) -> JsonStoreResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_vec_pretty(value)?;

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path)?;
    file.write_all(&content)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&temp_path, path)?;

    tracing::debug!(path = %path.display(), bytes = content.len(), "Snapshot written");
    Ok(())
}

/// Remove a snapshot, returning whether a file was there
pub fn remove_json<P: AsRef<Path>>(path: P) -> JsonStoreResult<bool> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Snapshot removed");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Sorted names of the snapshots in `dir`; a missing directory holds none
pub fn list_json_stems<P: AsRef<Path>>(dir: P) -> JsonStoreResult<Vec<String>> {
    let dir = dir.as_ref();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut stems = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
    struct Snapshot {
        project: String,
        step: u32,
    }

    fn snapshot(project: &str) -> Snapshot {
        Snapshot {
            project: project.to_string(),
            step: 3,
        }
    }

    #[test]
    fn test_atomic_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");

        save_json_atomic(&path, &snapshot("atlas")).unwrap();

        assert!(!path.with_extension("tmp").exists());

        let loaded: Snapshot = load_json(&path).unwrap();
        assert_eq!(loaded, snapshot("atlas"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result: JsonStoreResult<Snapshot> = load_json(dir.path().join("missing.json"));
        assert!(matches!(result, Err(JsonStoreError::NotFound { .. })));
    }

    #[test]
    fn test_load_corrupted_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: JsonStoreResult<Snapshot> = load_json(&path);
        assert!(matches!(result, Err(JsonStoreError::Serialize(_))));
    }

    #[test]
    fn test_remove_reports_presence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("atlas.json");
        save_json_atomic(&path, &snapshot("atlas")).unwrap();

        assert!(remove_json(&path).unwrap());
        assert!(!path.exists());
        assert!(!remove_json(&path).unwrap());
    }

    #[test]
    fn test_list_skips_temp_files() {
        let dir = tempdir().unwrap();
        save_json_atomic(dir.path().join("b.json"), &snapshot("b")).unwrap();
        save_json_atomic(dir.path().join("a.json"), &snapshot("a")).unwrap();
        std::fs::write(dir.path().join("c.tmp"), "{").unwrap();

        assert_eq!(list_json_stems(dir.path()).unwrap(), vec!["a", "b"]);
        assert!(list_json_stems(dir.path().join("missing")).unwrap().is_empty());
    }
}

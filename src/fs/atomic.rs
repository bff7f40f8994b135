use std::path::Path;

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{RepoError, Result};

/// Serialize `value` as pretty-printed JSON and write it to `path`, creating
/// parent directories as needed. Writes to a uniquely-named temp file first
/// and renames over the target so a crash mid-write never leaves `path`
/// half-written. Unlocked: callers that need read-modify-write consistency
/// go through [`super::locked_read_modify_write`] instead.
pub async fn write_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RepoError::io(parent, e))?;
    }

    let bytes = serde_json::to_vec_pretty(value).map_err(|e| RepoError::parse(path, e))?;

    let unique: u32 = rand::rng().random();
    let tmp_path = path.with_extension(format!("tmp.{}.{unique}", std::process::id()));

    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| RepoError::io(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| RepoError::io(path, e))?;

    Ok(())
}

/// Read and parse `path` as JSON. A missing file is not an error: it is
/// reported as `Ok(None)`, the "absent" result callers are expected to
/// substitute a default for. Any other I/O failure or corrupt JSON propagates.
pub async fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes).map_err(|e| RepoError::parse(path, e))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RepoError::io(path, e)),
    }
}

/// Recursively delete `path`, whether it is a file or a directory.
/// Non-existence is treated as success.
pub async fn remove(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| RepoError::io(path, e)),
        Ok(_) => tokio::fs::remove_file(path)
            .await
            .map_err(|e| RepoError::io(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RepoError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn read_absent_file_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");
        let got: Option<serde_json::Value> = read_file(&path).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("value.json");
        let value = json!({"a": 1, "b": "two"});

        write_file(&path, &value).await.unwrap();
        let got: Option<serde_json::Value> = read_file(&path).await.unwrap();
        assert_eq!(got, Some(value));
    }

    #[tokio::test]
    async fn write_leaves_no_temp_file_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("value.json");
        write_file(&path, &json!({"x": 1})).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = vec![];
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["value.json"]);
    }

    #[tokio::test]
    async fn remove_missing_path_is_ok() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope");
        remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn remove_deletes_directory_recursively() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        tokio::fs::write(nested.join("f.json"), b"{}").await.unwrap();

        remove(&dir.path().join("a")).await.unwrap();
        assert!(!dir.path().join("a").exists());
    }
}

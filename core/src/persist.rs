//! Shared JSON persistence helpers: atomic whole-file writes and pretty,
//! human-inspectable serialization, used by the character store and the
//! adventure-bible store alike.

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read and deserialize a JSON file.
pub async fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, PersistError> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Serialize `value` and write it so a concurrent reader never observes a
/// half-written file: write to a sibling temp file, then rename over the
/// destination (rename is atomic on the same filesystem).
pub async fn save_json_atomic<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), PersistError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, content).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Remove a file if it exists; a missing file is not an error.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> Result<(), PersistError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        value: u32,
    }

    #[tokio::test]
    async fn round_trips_through_atomic_write() {
        let dir = std::env::temp_dir().join(format!("keeper-persist-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("sample.json");

        let sample = Sample { name: "thing".to_string(), value: 7 };
        save_json_atomic(&path, &sample).await.unwrap();
        let loaded: Sample = load_json(&path).await.unwrap();
        assert_eq!(sample, loaded);

        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
        let _ = tokio::fs::remove_dir(&dir).await;
    }
}

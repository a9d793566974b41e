use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use entity_store_core::{RemoteStore, StoreError};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, instrument};

/// Remote store backed by a local directory, one JSON file per key.
///
/// Several processes pointed at the same directory share records and session
/// locks exactly as they would through a real remote store.
///
/// Files are stored at:
/// `{base_dir}/{key}.json`
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
    /// Distinguishes temp files of concurrent writes
    write_seq: AtomicU64,
}

impl FileStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the path of a key's file, rejecting keys that would escape the directory.
    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
            || key.chars().any(char::is_control)
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(format!("{}.json", key)))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        self.base_dir
            .join(format!(".{}.{}.{}.tmp", key, std::process::id(), seq))
    }
}

#[async_trait]
impl RemoteStore for FileStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.key_path(key)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No file for {}", key);
                return Ok(None);
            }
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let value = serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Some(value))
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        let bytes = serde_json::to_vec(value).map_err(|e| {
            StoreError::Serialization(format!("Failed to serialize {}: {}", key, e))
        })?;

        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            StoreError::Io(format!(
                "Failed to create storage dir {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        // Write atomically via temp file
        let temp_path = self.temp_path(key);
        fs::write(&temp_path, &bytes).await.map_err(|e| {
            StoreError::Io(format!(
                "Failed to write temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Io(format!(
                "Failed to rename temp file to {}: {}",
                path.display(),
                e
            )));
        }

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

//! JSON file per node under a state directory

use super::RecordStore;
use crate::error::{HealerError, Result};
use crate::models::RemediationRecord;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, node: &str) -> PathBuf {
        // node names are DNS subdomains, never contain a path separator
        self.dir.join(format!("{node}.json"))
    }
}

fn store_err(context: &str, path: &Path, err: impl std::fmt::Display) -> HealerError {
    HealerError::Store(format!("{context} {}: {err}", path.display()))
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn load(&self, node: &str) -> Result<Option<RemediationRecord>> {
        let path = self.path_for(node);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_err("failed to read", &path, e)),
        };

        let record = serde_json::from_slice(&data)
            .map_err(|e| store_err("failed to parse", &path, e))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &RemediationRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_err("failed to create directory", &self.dir, e))?;

        let path = self.path_for(&record.node);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| store_err("failed to serialize record for", &path, e))?;

        // Write atomically using temp file
        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| store_err("failed to create", &temp_path, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| store_err("failed to write", &temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| store_err("failed to sync", &temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| store_err("failed to rename into", &path, e))?;

        debug!(node = %record.node, state = %record.state, path = %path.display(), "Record saved");
        Ok(())
    }

    async fn remove(&self, node: &str) -> Result<()> {
        let path = self.path_for(node);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err("failed to remove", &path, e)),
        }
    }
}

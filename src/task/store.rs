//! JSON snapshot store for task batches.
//!
//! Every save rewrites the whole batch: the snapshot is written to a sibling
//! temp file and renamed over the previous one, so readers see either the old
//! or the new snapshot, never a partial file.

use std::path::{Path, PathBuf};

use tokio::fs;

use super::batch::TaskBatch;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid task snapshot {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// File-backed snapshot of a batch.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the batch stored at `path`.
    pub async fn load(&self) -> Result<TaskBatch, StoreError> {
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                action: "read",
                path: self.path.clone(),
                source,
            })?;
        TaskBatch::from_json_str(&text).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Atomically overwrite the snapshot with `batch`.
    pub async fn save(&self, batch: &TaskBatch) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(batch).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    action: "create directory for",
                    path: self.path.clone(),
                    source,
                })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)
            .await
            .map_err(|source| StoreError::Io {
                action: "write",
                path: tmp_path.clone(),
                source,
            })?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                action: "finalize",
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!("Saved {} tasks to {}", batch.len(), self.path.display());
        Ok(())
    }
}

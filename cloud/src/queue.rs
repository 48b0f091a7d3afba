use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    FailedPermanently,
}

/// A local file whose upload has not succeeded yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub filepath: String,
    /// Unix seconds at which the artifact was queued.
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub status: QueueStatus,
    #[serde(default)]
    pub retries: u32,
}

/// Durable list of pending uploads, stored as a JSON array.
///
/// Every mutation rewrites the whole file through a temp file and rename, so
/// a crash leaves either the old or the new list on disk.
#[derive(Debug)]
pub struct SyncQueue {
    path: PathBuf,
    max_retries: u32,
    items: Vec<QueueItem>,
}

impl SyncQueue {
    /// Load the queue file. A missing file is an empty queue; an unreadable
    /// one is logged and replaced by an empty queue.
    pub fn open(path: impl Into<PathBuf>, max_retries: u32) -> Self {
        let path = path.into();
        let items = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<QueueItem>>(&content) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "sync queue file is corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to read sync queue, starting empty");
                Vec::new()
            }
        };
        if !items.is_empty() {
            info!(items = items.len(), path = %path.display(), "loaded sync queue");
        }
        Self {
            path,
            max_retries,
            items,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    /// Queue a file for a later retry. Re-adding a path already in the
    /// queue refreshes its metadata instead of duplicating it.
    pub fn add(&mut self, filepath: &str, metadata: serde_json::Value) -> Result<(), QueueError> {
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        match self.items.iter_mut().find(|i| i.filepath == filepath) {
            Some(existing) => existing.metadata = metadata,
            None => self.items.push(QueueItem {
                filepath: filepath.to_string(),
                timestamp: now,
                metadata,
                status: QueueStatus::Pending,
                retries: 0,
            }),
        }
        info!(filepath, "queued for later upload");
        self.save()
    }

    /// Items still eligible for retry, in queue order.
    pub fn pending(&self) -> Vec<QueueItem> {
        self.items
            .iter()
            .filter(|i| i.status == QueueStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn mark_completed(&mut self, filepath: &str) -> Result<(), QueueError> {
        let before = self.items.len();
        self.items.retain(|i| i.filepath != filepath);
        if self.items.len() != before {
            debug!(filepath, "sync queue item completed");
            self.save()?;
        }
        Ok(())
    }

    /// Count a failed retry. Past `max_retries` the item is parked as
    /// permanently failed and no longer returned by [`SyncQueue::pending`].
    pub fn mark_failed(&mut self, filepath: &str) -> Result<(), QueueError> {
        let max_retries = self.max_retries;
        let Some(item) = self.items.iter_mut().find(|i| i.filepath == filepath) else {
            return Ok(());
        };
        item.retries += 1;
        if item.retries > max_retries {
            item.status = QueueStatus::FailedPermanently;
            warn!(filepath, retries = item.retries, "giving up on queued upload");
        } else {
            debug!(filepath, retries = item.retries, "queued upload failed again");
        }
        self.save()
    }

    pub fn clear(&mut self) -> Result<(), QueueError> {
        self.items.clear();
        self.save()
    }

    pub fn save(&self) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(QueueError::Io)?;
        }
        let json = serde_json::to_string_pretty(&self.items)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(QueueError::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(QueueError::Io)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("sync queue io error: {0}")]
    Io(std::io::Error),
    #[error("sync queue serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

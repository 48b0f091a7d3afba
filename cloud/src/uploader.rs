use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use booth_common::artifact::content_type_for;
use booth_common::config::Config;

use crate::db::{MetadataError, MetadataStore, PhotoRow};
use crate::queue::SyncQueue;
use crate::reconcile::created_at_from_name;
use crate::retention::{enforce_retention, RetentionReport};
use crate::storage::{ObjectStore, StorageError};

/// Result of one pass over the sync queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueSweep {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Pushes artifacts to the object store and records their rows.
///
/// An upload is object put followed by row upsert, both keyed by the same
/// filename, so a retried attempt overwrites rather than duplicates.
pub struct Uploader {
    objects: Arc<dyn ObjectStore>,
    rows: Arc<dyn MetadataStore>,
    queue: Mutex<SyncQueue>,
    attempts: u32,
    backoff: Duration,
    retention_cap: usize,
}

impl Uploader {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        rows: Arc<dyn MetadataStore>,
        queue: SyncQueue,
        config: &Config,
    ) -> Self {
        Self {
            objects,
            rows,
            queue: Mutex::new(queue),
            attempts: config.sync.upload_attempts.max(1),
            backoff: Duration::from_millis(config.sync.backoff_ms),
            retention_cap: config.retention.cap,
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn rows(&self) -> &Arc<dyn MetadataStore> {
        &self.rows
    }

    /// Upload a file from disk. On failure the path goes to the sync queue.
    pub async fn upload_file(&self, path: &Path, metadata: serde_json::Value) -> Option<String> {
        let Some(key) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            warn!(path = %path.display(), "not a file path, skipping upload");
            return None;
        };
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "cannot read file for upload");
                return None;
            }
        };

        match self.upload_with_retry(&key, data, &metadata, Utc::now()).await {
            Some(url) => {
                self.after_success().await;
                Some(url)
            }
            None => {
                let mut queue = self.queue.lock().await;
                if let Err(e) = queue.add(&path.to_string_lossy(), metadata) {
                    error!(error = %e, path = %path.display(), "failed to queue upload");
                }
                None
            }
        }
    }

    /// Upload an in-memory artifact under `filename`. There is nothing on
    /// disk to retry from, so a failed upload is dropped.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        filename: &str,
        metadata: serde_json::Value,
    ) -> Option<String> {
        match self.upload_with_retry(filename, data, &metadata, Utc::now()).await {
            Some(url) => {
                self.after_success().await;
                Some(url)
            }
            None => {
                warn!(filename, "upload failed, artifact discarded");
                None
            }
        }
    }

    async fn upload_with_retry(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: &serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Option<String> {
        for attempt in 1..=self.attempts {
            match self.put_once(key, data.clone(), metadata, created_at).await {
                Ok(url) => {
                    info!(key, attempt, url = %url, "uploaded");
                    return Some(url);
                }
                Err(e) => {
                    warn!(error = %e, key, attempt, max = self.attempts, "upload attempt failed");
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
        None
    }

    async fn put_once(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: &serde_json::Value,
        fallback_created_at: DateTime<Utc>,
    ) -> Result<String, UploadError> {
        let created_at = created_at_from_name(key).unwrap_or(fallback_created_at);
        self.objects.put(key, data, content_type_for(key)).await?;
        let url = self.objects.public_url(key);
        let row = PhotoRow::new(key, url.clone(), created_at, metadata.clone());
        self.rows.upsert(&row).await?;
        Ok(url)
    }

    async fn after_success(&self) {
        let sweep = self.process_queue().await;
        if sweep.attempted > 0 {
            debug!(?sweep, "sync queue processed after upload");
        }
        self.enforce_retention().await;
    }

    /// One attempt per pending queue item. Missing files count as a failure
    /// so they eventually age out of the queue.
    pub async fn process_queue(&self) -> QueueSweep {
        let mut queue = self.queue.lock().await;
        let mut sweep = QueueSweep::default();

        for item in queue.pending() {
            sweep.attempted += 1;
            let path = Path::new(&item.filepath);
            let outcome = match tokio::fs::read(path).await {
                Ok(data) => {
                    let key = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| item.filepath.clone());
                    let created_at = DateTime::from_timestamp_millis((item.timestamp * 1000.0) as i64)
                        .unwrap_or_else(Utc::now);
                    self.put_once(&key, data, &item.metadata, created_at).await
                }
                Err(e) => Err(UploadError::Io(e)),
            };

            let recorded = match outcome {
                Ok(url) => {
                    info!(filepath = %item.filepath, url = %url, "queued upload succeeded");
                    sweep.uploaded += 1;
                    queue.mark_completed(&item.filepath)
                }
                Err(e) => {
                    warn!(error = %e, filepath = %item.filepath, "queued upload failed");
                    sweep.failed += 1;
                    queue.mark_failed(&item.filepath)
                }
            };
            if let Err(e) = recorded {
                error!(error = %e, "failed to persist sync queue");
            }
        }

        sweep
    }

    pub async fn enforce_retention(&self) -> Option<RetentionReport> {
        match enforce_retention(self.objects.as_ref(), self.rows.as_ref(), self.retention_cap).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "retention pass failed");
                None
            }
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.pending().len()
    }

    /// Retry queued uploads every `interval` for the life of the process.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let sweep = self.process_queue().await;
                if sweep.attempted > 0 {
                    info!(
                        attempted = sweep.attempted,
                        uploaded = sweep.uploaded,
                        failed = sweep.failed,
                        "sync queue sweep"
                    );
                }
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

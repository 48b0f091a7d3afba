pub mod db;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod retention;
pub mod storage;
pub mod uploader;

use booth_common::config::{Config, MetadataBackend, ObjectBackend};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use db::{MetadataError, MetadataStore, RestMetadataStore, SqliteMetadataStore};
use queue::SyncQueue;
use storage::{LocalObjectStore, ObjectStore, S3ObjectStore, StorageError};
use uploader::Uploader;

/// Object and row backends selected by configuration.
#[derive(Clone)]
pub struct Stores {
    pub objects: Arc<dyn ObjectStore>,
    pub rows: Arc<dyn MetadataStore>,
}

impl Stores {
    pub async fn open(config: &Config) -> Result<Self, CloudError> {
        let objects: Arc<dyn ObjectStore> = match config.cloud.object_backend {
            ObjectBackend::S3 => Arc::new(S3ObjectStore::new(config).await),
            ObjectBackend::Local => Arc::new(LocalObjectStore::new(&config.cloud.local_store_dir)?),
        };
        let rows: Arc<dyn MetadataStore> = match config.cloud.metadata_backend {
            MetadataBackend::Rest => Arc::new(RestMetadataStore::new(config)?),
            MetadataBackend::Sqlite => {
                Arc::new(SqliteMetadataStore::open(Path::new(&config.cloud.sqlite_path))?)
            }
        };
        info!(
            objects = ?config.cloud.object_backend,
            rows = ?config.cloud.metadata_backend,
            "cloud stores ready"
        );
        Ok(Self { objects, rows })
    }

    pub fn uploader(&self, config: &Config) -> Uploader {
        let queue = SyncQueue::open(&config.sync.queue_path, config.sync.max_retries);
        Uploader::new(Arc::clone(&self.objects), Arc::clone(&self.rows), queue, config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

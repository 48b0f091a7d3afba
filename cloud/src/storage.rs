use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_types::region::Region;
use booth_common::config::Config;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Blob store holding uploaded artifacts, addressed by flat keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `data` under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys currently in the store.
    async fn list(&self) -> Result<Vec<String>, StorageError>;

    /// URL a browser can load the object from.
    fn public_url(&self, key: &str) -> String;
}

/// `<base>/storage/v1/object/public/<bucket>/<key>`
pub fn public_url(base: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}/storage/v1/object/public/{}/{}",
        base.trim_end_matches('/'),
        bucket,
        key
    )
}

/// S3-compatible endpoint of the hosted storage service.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base: String,
}

impl S3ObjectStore {
    pub async fn new(config: &Config) -> Self {
        let creds = Credentials::new(
            &config.cloud.s3_access_key,
            &config.cloud.s3_secret_key,
            None,
            None,
            "static",
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(config.s3_endpoint())
            .credentials_provider(creds)
            .region(Region::new(config.cloud.s3_region.clone()))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        info!(bucket = %config.cloud.bucket, endpoint = %config.s3_endpoint(), "s3 object store ready");

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.cloud.bucket.clone(),
            public_base: config.cloud.url.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Put(e.to_string()))?;
        debug!(key, size, "stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete(e.to_string()))?;
        debug!(key, "deleted object");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| StorageError::List(e.to_string()))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(keys)
    }

    fn public_url(&self, key: &str) -> String {
        public_url(&self.public_base, &self.bucket, key)
    }
}

/// Directory-backed store for offline booths and tests.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StorageError::Io(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StorageError::Io(path.display().to_string(), e))?;
        debug!(key, "stored object locally");
        Ok(())
    }

    /// Deleting a missing key succeeds, as it does against S3.
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "object already gone");
                Ok(())
            }
            Err(e) => Err(StorageError::Io(path.display().to_string(), e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::Io(self.root.display().to_string(), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(self.root.display().to_string(), e))?
        {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                keys.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn public_url(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to put object: {0}")]
    Put(String),
    #[error("failed to delete object: {0}")]
    Delete(String),
    #[error("failed to list objects: {0}")]
    List(String),
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("io error on {0}: {1}")]
    Io(String, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_shape() {
        assert_eq!(
            public_url("https://abc.supabase.co/", "photos", "photo_1_aa.jpg"),
            "https://abc.supabase.co/storage/v1/object/public/photos/photo_1_aa.jpg"
        );
    }

    #[tokio::test]
    async fn local_store_put_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();

        store.put("b.jpg", vec![1, 2, 3], "image/jpeg").await.unwrap();
        store.put("a.gif", vec![4], "image/gif").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a.gif", "b.jpg"]);

        store.put("b.jpg", vec![9], "image/jpeg").await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("b.jpg")).unwrap(), vec![9]);

        store.delete("a.gif").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["b.jpg"]);
        // already gone
        store.delete("a.gif").await.unwrap();
    }

    #[tokio::test]
    async fn local_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        let err = store.put("../escape.jpg", vec![], "image/jpeg").await;
        assert!(matches!(err, Err(StorageError::InvalidKey(_))));
    }
}

use tracing::{debug, info, warn};

use crate::db::{MetadataError, MetadataStore};
use crate::storage::ObjectStore;

/// Outcome of one retention pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Rows present before the pass.
    pub total: usize,
    /// Rows over the cap, the number the pass tried to remove.
    pub excess: usize,
    /// Rows removed.
    pub deleted: usize,
    /// Rows that could not be removed.
    pub failed: usize,
    /// Objects whose delete failed. Their rows are still removed.
    pub object_errors: usize,
}

/// Keep at most `cap` artifacts, removing the oldest first.
///
/// For each victim the object is deleted before its row, so a crash in
/// between leaves a row pointing at nothing rather than an untracked object.
/// A failed object delete is logged and the row is removed anyway, so the
/// table always shrinks to `cap` unless row deletes fail.
pub async fn enforce_retention(
    objects: &dyn ObjectStore,
    rows: &dyn MetadataStore,
    cap: usize,
) -> Result<RetentionReport, MetadataError> {
    let all = rows.list_oldest_first().await?;
    let mut report = RetentionReport {
        total: all.len(),
        ..Default::default()
    };

    if all.len() <= cap {
        debug!(count = all.len(), cap, "retention: under cap");
        return Ok(report);
    }

    report.excess = all.len() - cap;
    info!(count = all.len(), cap, excess = report.excess, "retention: removing oldest artifacts");

    for row in all.iter().take(report.excess) {
        if let Err(e) = objects.delete(&row.filename).await {
            warn!(error = %e, filename = %row.filename, "retention: failed to delete object, removing row anyway");
            report.object_errors += 1;
        }
        match rows.delete_by_filename(&row.filename).await {
            Ok(_) => {
                report.deleted += 1;
                debug!(filename = %row.filename, "retention: removed");
            }
            Err(e) => {
                warn!(error = %e, filename = %row.filename, "retention: failed to delete row");
                report.failed += 1;
            }
        }
    }

    info!(
        deleted = report.deleted,
        failed = report.failed,
        object_errors = report.object_errors,
        "retention pass complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{PhotoRow, SqliteMetadataStore};
    use crate::storage::{LocalObjectStore, StorageError};
    use chrono::TimeZone;

    async fn seed(
        objects: &LocalObjectStore,
        rows: &SqliteMetadataStore,
        count: i64,
    ) {
        for i in 0..count {
            let name = format!("photo_{}_0000000{}.jpg", 1000 + i, i % 10);
            objects.put(&name, vec![i as u8], "image/jpeg").await.unwrap();
            rows.upsert(&PhotoRow::new(
                name.clone(),
                objects.public_url(&name),
                chrono::Utc.timestamp_opt(1000 + i, 0).unwrap(),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn removes_oldest_over_cap() {
        let dir = tempfile::tempdir().unwrap();
        let objects = LocalObjectStore::new(dir.path()).unwrap();
        let rows = SqliteMetadataStore::open_in_memory().unwrap();
        seed(&objects, &rows, 7).await;

        let report = enforce_retention(&objects, &rows, 5).await.unwrap();
        assert_eq!(report.total, 7);
        assert_eq!(report.excess, 2);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 0);

        let remaining = rows.list_oldest_first().await.unwrap();
        assert_eq!(remaining.len(), 5);
        assert_eq!(remaining[0].created_at.timestamp(), 1002);
        assert_eq!(objects.list().await.unwrap().len(), 5);
        assert!(!dir.path().join("photo_1000_00000000.jpg").exists());
    }

    #[tokio::test]
    async fn under_cap_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let objects = LocalObjectStore::new(dir.path()).unwrap();
        let rows = SqliteMetadataStore::open_in_memory().unwrap();
        seed(&objects, &rows, 3).await;

        let report = enforce_retention(&objects, &rows, 3).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(rows.list_oldest_first().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_object_still_reaches_cap() {
        let dir = tempfile::tempdir().unwrap();
        let objects = LocalObjectStore::new(dir.path()).unwrap();
        let rows = SqliteMetadataStore::open_in_memory().unwrap();
        seed(&objects, &rows, 4).await;
        std::fs::remove_file(dir.path().join("photo_1000_00000000.jpg")).unwrap();

        let report = enforce_retention(&objects, &rows, 2).await.unwrap();
        assert_eq!(report.excess, 2);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 0);

        let remaining = rows.list_oldest_first().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].created_at.timestamp(), 1002);

        let again = enforce_retention(&objects, &rows, 2).await.unwrap();
        assert_eq!(again.excess, 0);
    }

    /// Store whose deletes always fail.
    struct BrokenDeletes(LocalObjectStore);

    #[async_trait::async_trait]
    impl ObjectStore for BrokenDeletes {
        async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
            self.0.put(key, data, content_type).await
        }

        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Delete("bucket unreachable".into()))
        }

        async fn list(&self) -> Result<Vec<String>, StorageError> {
            self.0.list().await
        }

        fn public_url(&self, key: &str) -> String {
            self.0.public_url(key)
        }
    }

    #[tokio::test]
    async fn object_delete_failure_still_removes_row() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalObjectStore::new(dir.path()).unwrap();
        let rows = SqliteMetadataStore::open_in_memory().unwrap();
        seed(&local, &rows, 5).await;
        let objects = BrokenDeletes(local);

        let report = enforce_retention(&objects, &rows, 2).await.unwrap();
        assert_eq!(report.deleted, 3);
        assert_eq!(report.object_errors, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(rows.list_oldest_first().await.unwrap().len(), 2);
    }
}

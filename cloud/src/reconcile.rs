use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{info, warn};

use booth_common::artifact::{is_image_name, timestamp_from_filename};

use crate::db::{MetadataError, MetadataStore, PhotoRow};
use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows created for objects that had none.
    pub inserted: usize,
    /// Rows dropped because their object is gone.
    pub removed: usize,
}

/// Capture time encoded in an artifact filename.
pub(crate) fn created_at_from_name(name: &str) -> Option<DateTime<Utc>> {
    timestamp_from_filename(name).and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Bring the row table in line with the object store.
///
/// Objects without a row get one, dated from the timestamp in the filename
/// (or now, when the name carries none). Rows without an object are deleted.
pub async fn reconcile(
    objects: &dyn ObjectStore,
    rows: &dyn MetadataStore,
) -> Result<ReconcileReport, ReconcileError> {
    let keys: Vec<String> = objects
        .list()
        .await?
        .into_iter()
        .filter(|k| is_image_name(k))
        .collect();
    let existing = rows.list_oldest_first().await?;

    let key_set: HashSet<&str> = keys.iter().map(String::as_str).collect();
    let row_set: HashSet<&str> = existing.iter().map(|r| r.filename.as_str()).collect();
    let mut report = ReconcileReport::default();

    for key in keys.iter().filter(|k| !row_set.contains(k.as_str())) {
        let created_at = created_at_from_name(key).unwrap_or_else(Utc::now);
        let row = PhotoRow::new(
            key.clone(),
            objects.public_url(key),
            created_at,
            serde_json::json!({ "backfilled": true }),
        );
        match rows.upsert(&row).await {
            Ok(()) => {
                info!(filename = %key, %created_at, "backfilled row");
                report.inserted += 1;
            }
            Err(e) => warn!(error = %e, filename = %key, "failed to backfill row"),
        }
    }

    for row in existing.iter().filter(|r| !key_set.contains(r.filename.as_str())) {
        match rows.delete_by_filename(&row.filename).await {
            Ok(_) => {
                info!(filename = %row.filename, "removed orphan row");
                report.removed += 1;
            }
            Err(e) => warn!(error = %e, filename = %row.filename, "failed to remove orphan row"),
        }
    }

    Ok(report)
}

/// Rewrite `created_at` from the filename timestamp wherever they disagree.
/// Returns the number of rows changed.
pub async fn fix_timestamps(rows: &dyn MetadataStore) -> Result<usize, ReconcileError> {
    let mut fixed = 0;
    for row in rows.list_oldest_first().await? {
        let Some(expected) = created_at_from_name(&row.filename) else {
            continue;
        };
        if row.created_at.timestamp() == expected.timestamp() {
            continue;
        }
        if rows.set_created_at(&row.filename, expected).await? {
            info!(filename = %row.filename, from = %row.created_at, to = %expected, "fixed timestamp");
            fixed += 1;
        }
    }
    Ok(fixed)
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

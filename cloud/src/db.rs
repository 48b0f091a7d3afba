use async_trait::async_trait;
use booth_common::config::Config;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// One uploaded artifact as recorded in the `photos` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRow {
    #[serde(default, skip_serializing)]
    pub id: i64,
    pub filename: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PhotoRow {
    pub fn new(
        filename: impl Into<String>,
        image_url: impl Into<String>,
        created_at: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            filename: filename.into(),
            image_url: image_url.into(),
            created_at,
            metadata,
        }
    }
}

/// Table of artifact rows, keyed by filename.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert the row, or overwrite the existing row with the same filename.
    async fn upsert(&self, row: &PhotoRow) -> Result<(), MetadataError>;

    /// All rows ordered by `created_at`, oldest first.
    async fn list_oldest_first(&self) -> Result<Vec<PhotoRow>, MetadataError>;

    /// Returns whether a row was removed.
    async fn delete_by_filename(&self, filename: &str) -> Result<bool, MetadataError>;

    async fn set_created_at(
        &self,
        filename: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, MetadataError>;
}

/// Local SQLite table. WAL mode lets the sync CLI read while the booth writes.
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|_| rusqlite::Error::InvalidPath(parent.into()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "photo metadata database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, MetadataError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, MetadataError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS photos (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                filename    TEXT    NOT NULL UNIQUE,
                image_url   TEXT    NOT NULL,
                created_at  INTEGER NOT NULL,
                metadata    TEXT    NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_photos_created ON photos(created_at);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, MetadataError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, MetadataError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| MetadataError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| MetadataError::Task(e.to_string()))?
    }
}

fn photo_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhotoRow> {
    let created_ms: i64 = row.get(3)?;
    let metadata: String = row.get(4)?;
    Ok(PhotoRow {
        id: row.get(0)?,
        filename: row.get(1)?,
        image_url: row.get(2)?,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn upsert(&self, row: &PhotoRow) -> Result<(), MetadataError> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO photos (filename, image_url, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(filename) DO UPDATE SET
                    image_url = excluded.image_url,
                    created_at = excluded.created_at,
                    metadata = excluded.metadata",
                params![
                    row.filename,
                    row.image_url,
                    row.created_at.timestamp_millis(),
                    row.metadata.to_string()
                ],
            )?;
            debug!(filename = %row.filename, "upserted photo row");
            Ok(())
        })
        .await
    }

    async fn list_oldest_first(&self) -> Result<Vec<PhotoRow>, MetadataError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, filename, image_url, created_at, metadata
                 FROM photos ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([], photo_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<bool, MetadataError> {
        let filename = filename.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute("DELETE FROM photos WHERE filename = ?1", params![filename])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn set_created_at(
        &self,
        filename: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, MetadataError> {
        let filename = filename.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE photos SET created_at = ?1 WHERE filename = ?2",
                params![created_at.timestamp_millis(), filename],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

impl SqliteMetadataStore {
    /// Single row lookup.
    pub fn get(&self, filename: &str) -> Result<Option<PhotoRow>, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::Poisoned)?;
        let row = conn
            .query_row(
                "SELECT id, filename, image_url, created_at, metadata
                 FROM photos WHERE filename = ?1",
                params![filename],
                photo_from_row,
            )
            .optional()?;
        Ok(row)
    }
}

/// Columns of the hosted `photos` table. Artifact metadata is kept only in
/// the local SQLite table.
const REST_COLUMNS: &str = "filename,image_url,created_at";

#[derive(Serialize)]
struct RestRow<'a> {
    filename: &'a str,
    image_url: &'a str,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a PhotoRow> for RestRow<'a> {
    fn from(row: &'a PhotoRow) -> Self {
        Self {
            filename: &row.filename,
            image_url: &row.image_url,
            created_at: row.created_at,
        }
    }
}

/// PostgREST table of the hosted backend.
pub struct RestMetadataStore {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

impl RestMetadataStore {
    pub fn new(config: &Config) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/rest/v1/{}",
                config.cloud.url.trim_end_matches('/'),
                config.cloud.table
            ),
            key: config.cloud.key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, &self.endpoint)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, MetadataError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(MetadataError::Status(status.as_u16(), body))
        }
    }
}

#[async_trait]
impl MetadataStore for RestMetadataStore {
    async fn upsert(&self, row: &PhotoRow) -> Result<(), MetadataError> {
        let resp = self
            .request(reqwest::Method::POST)
            .query(&[("on_conflict", "filename")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[RestRow::from(row)])
            .send()
            .await?;
        Self::check(resp).await?;
        debug!(filename = %row.filename, "upserted photo row");
        Ok(())
    }

    async fn list_oldest_first(&self) -> Result<Vec<PhotoRow>, MetadataError> {
        let resp = self
            .request(reqwest::Method::GET)
            .query(&[
                ("select", REST_COLUMNS),
                ("order", "created_at.asc"),
            ])
            .send()
            .await?;
        let rows = Self::check(resp).await?.json::<Vec<PhotoRow>>().await?;
        Ok(rows)
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<bool, MetadataError> {
        let resp = self
            .request(reqwest::Method::DELETE)
            .query(&[("filename", format!("eq.{filename}"))])
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let deleted = Self::check(resp).await?.json::<Vec<serde_json::Value>>().await?;
        Ok(!deleted.is_empty())
    }

    async fn set_created_at(
        &self,
        filename: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, MetadataError> {
        let resp = self
            .request(reqwest::Method::PATCH)
            .query(&[("filename", format!("eq.{filename}"))])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "created_at": created_at }))
            .send()
            .await?;
        let updated = Self::check(resp).await?.json::<Vec<serde_json::Value>>().await?;
        Ok(!updated.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metadata service returned {0}: {1}")]
    Status(u16, String),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("blocking task failed: {0}")]
    Task(String),
}

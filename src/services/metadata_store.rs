//! Metadata store for ingested files.
//!
//! [`MetadataStore`] is the seam the ingestion and resolution services depend
//! on; [`SqliteMetadataStore`] implements it over the `files` table.

use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::file_record::{FileRecord, NewFileRecord};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no file record with id {0}")]
    NotFound(i64),
    #[error("metadata query failed")]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a new record and return it with its id.
    async fn insert(&self, record: NewFileRecord) -> MetadataResult<FileRecord>;

    /// Records whose hash starts with `prefix` (case-insensitive), newest first.
    async fn find_by_hash_prefix(&self, prefix: &str) -> MetadataResult<Vec<FileRecord>>;

    /// Add one to the download counter of record `id` and return the new value.
    async fn increment_download_count(&self, id: i64) -> MetadataResult<i64>;

    /// Records whose name or hash contains `text`, newest first.
    async fn search(&self, text: &str, limit: i64) -> MetadataResult<Vec<FileRecord>>;

    /// Most recent records, newest first.
    async fn recent(&self, limit: i64) -> MetadataResult<Vec<FileRecord>>;
}

const FILE_COLUMNS: &str = "id, filehash, storage_key, filename, size_bytes, content_type, \
                            origin, url, created_at, download_count";

#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Escape `%`, `_` and `\` so `text` matches literally inside a LIKE pattern
/// declared with `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: NewFileRecord) -> MetadataResult<FileRecord> {
        let row = sqlx::query_as::<_, FileRecord>(&format!(
            "INSERT INTO files (
                filehash, storage_key, filename, size_bytes, content_type,
                origin, url, created_at, download_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            RETURNING {FILE_COLUMNS}"
        ))
        .bind(&record.filehash)
        .bind(&record.storage_key)
        .bind(&record.filename)
        .bind(record.size_bytes)
        .bind(&record.content_type)
        .bind(&record.origin)
        .bind(&record.url)
        .bind(record.created_at)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn find_by_hash_prefix(&self, prefix: &str) -> MetadataResult<Vec<FileRecord>> {
        let pattern = format!("{}%", escape_like(&prefix.to_ascii_lowercase()));
        let rows = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE filehash LIKE ? ESCAPE '\\'
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(pattern)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn increment_download_count(&self, id: i64) -> MetadataResult<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE files SET download_count = download_count + 1
             WHERE id = ?
             RETURNING download_count",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        count.ok_or(MetadataError::NotFound(id))
    }

    async fn search(&self, text: &str, limit: i64) -> MetadataResult<Vec<FileRecord>> {
        let pattern = format!("%{}%", escape_like(text));
        let rows = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE filename LIKE ? ESCAPE '\\' OR filehash LIKE ? ESCAPE '\\'
             ORDER BY created_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn recent(&self, limit: i64) -> MetadataResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             ORDER BY created_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

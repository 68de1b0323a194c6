//! Represents an ingested file as tracked by the metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::digest::SHORT_DIGEST_LEN;

/// One successfully ingested upload.
///
/// Rows are created once per ingestion and never updated apart from
/// `download_count`. Identical content ingested twice yields two rows sharing
/// the same `filehash` and `storage_key`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    /// Autoincrement row id.
    pub id: i64,

    /// Full lowercase hex SHA-256 of the content.
    pub filehash: String,

    /// Object key in the bucket (`{short}_{name}`).
    pub storage_key: String,

    /// Display name supplied by the uploader.
    pub filename: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Declared content type (MIME type).
    pub content_type: Option<String>,

    /// Client address the upload came from.
    pub origin: Option<String>,

    /// Public URL of the stored object.
    pub url: String,

    pub created_at: DateTime<Utc>,

    /// Number of successful unique resolutions of this record.
    pub download_count: i64,
}

impl FileRecord {
    /// First 8 hex characters of the digest.
    pub fn short_hash(&self) -> &str {
        let end = self.filehash.len().min(SHORT_DIGEST_LEN);
        &self.filehash[..end]
    }

    /// Path at which this record can be resolved by short digest.
    pub fn info_path(&self) -> String {
        format!("/f/{}", self.short_hash())
    }
}

/// Values for a record that has not been inserted yet.
#[derive(Clone, Debug)]
pub struct NewFileRecord {
    pub filehash: String,
    pub storage_key: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub origin: Option<String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

//! Object-store client interface.
//!
//! The gateway only ever talks to the object store through
//! [`ObjectStoreClient`]. [`S3ObjectStore`](super::s3_store::S3ObjectStore)
//! targets any S3-compatible endpoint; [`MemoryObjectStore`](super::memory_store::MemoryObjectStore)
//! keeps objects in-process for local runs and tests.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::models::multipart::CompletedPart;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("{operation} `{key}` failed: {message}")]
    Backend {
        operation: &'static str,
        key: String,
        message: String,
    },
    #[error("multipart upload `{0}` does not exist")]
    NoSuchUpload(String),
    #[error("invalid part {part_number}: {reason}")]
    InvalidPart { part_number: i32, reason: String },
    #[error("part {0} is out of order")]
    InvalidPartOrder(i32),
    #[error("store response for `{key}` is missing {field}")]
    MissingField { key: String, field: &'static str },
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// S3-style object operations used by the ingestion pipeline.
///
/// Implementations must be safe to share between concurrent ingestions.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Store `body` under `key` in one request.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<()>;

    /// Start a multipart upload and return its upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<String>;

    /// Upload one part and return its ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> ObjectStoreResult<String>;

    /// Assemble the object from `parts`, which must list every uploaded part
    /// in ascending order.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ObjectStoreResult<()>;

    /// Discard a multipart upload and its parts.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> ObjectStoreResult<()>;
}

//! Ingestion coordinator.
//!
//! Turns one upload into one stored object and one metadata row:
//! validate, hash, derive the storage key, pick direct or multipart, upload,
//! then insert the record. There is no deduplication pass: identical content
//! is uploaded again under the same key and gets its own row.

use bytes::Bytes;
use chrono::Utc;
use std::{io::SeekFrom, sync::Arc};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{
    hasher::hash_reader,
    metadata_store::{MetadataError, MetadataStore},
    multipart::{MultipartError, MultipartUpload, ProgressObserver},
    object_store::{ObjectStoreClient, ObjectStoreError},
    strategy::{self, DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE, UploadStrategy},
};
use crate::{
    errors::ValidationError,
    models::{
        digest::ContentDigest,
        file_record::NewFileRecord,
        multipart::{IngestOutcome, UploadProgress, UploadRequest},
    },
};

/// S3 rejects keys longer than 1024 bytes.
const MAX_OBJECT_KEY_LEN: usize = 1024;

const FALLBACK_NAME: &str = "upload";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("reading upload body failed")]
    Read(#[from] std::io::Error),
    #[error("object upload failed")]
    Store(#[from] ObjectStoreError),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    #[error("upload cancelled")]
    Cancelled,
    /// The object is stored but no record points at it.
    #[error("object `{storage_key}` was stored but its metadata could not be saved")]
    Untracked {
        storage_key: String,
        #[source]
        source: MetadataError,
    },
}

/// Settings the coordinator is constructed with.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub bucket: String,
    /// Bodies larger than this use multipart.
    pub multipart_threshold: u64,
    pub part_size: u64,
    /// Prefix of public object URLs; the storage key is appended.
    pub public_base_url: String,
}

impl IngestConfig {
    pub fn new(bucket: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            public_base_url: public_base_url.into(),
        }
    }

    pub fn object_url(&self, storage_key: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            storage_key
        )
    }
}

/// Keep the last path component of an uploaded name and strip control
/// characters.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `{short digest}_{sanitized name}`, capped at the S3 key length.
pub fn storage_key(digest: &ContentDigest, filename: &str) -> String {
    let mut key = format!("{}_{}", digest.short(), sanitize_filename(filename));
    if key.len() > MAX_OBJECT_KEY_LEN {
        let mut end = MAX_OBJECT_KEY_LEN;
        while !key.is_char_boundary(end) {
            end -= 1;
        }
        key.truncate(end);
    }
    key
}

/// Logs multipart progress at info level.
struct ProgressLogger<'a> {
    key: &'a str,
}

impl ProgressObserver for ProgressLogger<'_> {
    fn on_progress(&self, progress: &UploadProgress) {
        info!(
            "`{}`: {:.0}% uploaded ({}/{} bytes)",
            self.key,
            progress.ratio() * 100.0,
            progress.bytes_uploaded,
            progress.total_bytes
        );
    }
}

#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn ObjectStoreClient>,
    metadata: Arc<dyn MetadataStore>,
    config: IngestConfig,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        metadata: Arc<dyn MetadataStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest one upload. Cancelling `cancel` stops the transfer and aborts
    /// any multipart upload in flight.
    pub async fn ingest<R>(
        &self,
        mut request: UploadRequest<R>,
        cancel: CancellationToken,
    ) -> Result<IngestOutcome, IngestError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        if request.filename.trim().is_empty() {
            return Err(ValidationError::MissingFilename.into());
        }

        let body = &mut request.body;
        let size = body.seek(SeekFrom::End(0)).await?;
        if size == 0 {
            return Err(ValidationError::EmptyFile.into());
        }

        let digest = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            hashed = hash_reader(body) => hashed?,
        };
        let key = storage_key(&digest, &request.filename);
        let strategy = strategy::select(size, self.config.multipart_threshold);
        info!(
            "ingesting `{}` ({} bytes, sha256 {}) as `{}` via {:?}",
            request.filename, size, digest, key, strategy
        );

        let content_type = request.content_type.as_deref();
        let parts = match strategy {
            UploadStrategy::Direct => {
                self.put_direct(body, size, &key, content_type, &cancel)
                    .await?;
                1
            }
            UploadStrategy::Multipart => {
                let logger = ProgressLogger { key: &key };
                let mut upload = MultipartUpload::new(
                    self.store.as_ref(),
                    &self.config.bucket,
                    &key,
                    self.config.part_size,
                )
                .with_content_type(content_type)
                .with_observer(&logger)
                .with_cancellation(cancel.clone());
                upload.run(body, size).await?.parts.len()
            }
        };

        let new_record = NewFileRecord {
            filehash: digest.to_hex(),
            storage_key: key.clone(),
            filename: request.filename.clone(),
            size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
            content_type: request.content_type.clone(),
            origin: request.origin.clone(),
            url: self.config.object_url(&key),
            created_at: Utc::now(),
        };

        let record = match self.metadata.insert(new_record).await {
            Ok(record) => record,
            Err(source) => {
                error!(
                    "object `{}` stored but metadata insert failed, object is untracked: {}",
                    key, source
                );
                return Err(IngestError::Untracked {
                    storage_key: key,
                    source,
                });
            }
        };

        info!("stored `{}` as record {}", key, record.id);
        Ok(IngestOutcome {
            record,
            strategy,
            parts,
        })
    }

    async fn put_direct<R>(
        &self,
        body: &mut R,
        size: u64,
        key: &str,
        content_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buffer = Vec::with_capacity(size as usize);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            read = body.read_to_end(&mut buffer) => { read?; }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            put = self.store.put_object(&self.config.bucket, key, Bytes::from(buffer), content_type) => {
                put.map_err(IngestError::from)
            }
        }
    }
}

//! Multipart upload orchestration.
//!
//! Drives the create / upload-part / complete protocol as an explicit state
//! machine:
//!
//! ```text
//! Created -> InProgress -> AllPartsSent -> Completed
//!                 |              |
//!                 +--------------+--> Aborting -> Aborted
//! ```
//!
//! Any failure after the upload has been created (part rejected, source read
//! error, completion rejected, caller cancellation) issues exactly one
//! `abort_multipart_upload` and then hands the original error back. Abort is
//! best effort: its own failure is logged and never replaces the original
//! error, so the store may keep a dangling incomplete upload.

use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    object_store::{ObjectStoreClient, ObjectStoreError},
    strategy::{MAX_PARTS_PER_UPLOAD, part_count},
};
use crate::{
    errors::ValidationError,
    models::multipart::{CompletedPart, PartRange, UploadProgress},
};

/// Receives progress after every accepted part.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &UploadProgress);
}

/// Lifecycle of one multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadState {
    Created,
    InProgress { upload_id: String },
    AllPartsSent { upload_id: String },
    Completed { upload_id: String },
    Aborting { upload_id: String },
    /// `cleaned_up` is false when the abort request itself failed.
    Aborted { upload_id: String, cleaned_up: bool },
}

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not start multipart upload")]
    Create(#[source] ObjectStoreError),
    #[error("upload {upload_id}: part {part_number} was rejected")]
    Part {
        upload_id: String,
        part_number: i32,
        #[source]
        source: ObjectStoreError,
    },
    #[error("upload {upload_id}: reading part {part_number} failed")]
    Read {
        upload_id: String,
        part_number: i32,
        #[source]
        source: io::Error,
    },
    #[error("upload {upload_id}: part list has a gap at part {part_number}")]
    NonContiguous { upload_id: String, part_number: i32 },
    #[error("upload {upload_id}: completion was rejected")]
    Complete {
        upload_id: String,
        #[source]
        source: ObjectStoreError,
    },
    #[error("multipart upload cancelled")]
    Cancelled { upload_id: Option<String> },
}

/// Result of a completed multipart upload.
#[derive(Clone, Debug)]
pub struct MultipartOutcome {
    pub upload_id: String,
    /// Parts in the order they were submitted for completion.
    pub parts: Vec<CompletedPart>,
    pub bytes_uploaded: u64,
}

/// Split `total_size` bytes into parts of `part_size`, numbered from 1.
///
/// Only the last part may be shorter, and it is never empty.
pub fn plan_parts(total_size: u64, part_size: u64) -> Result<Vec<PartRange>, ValidationError> {
    if part_size == 0 {
        return Err(ValidationError::ZeroPartSize);
    }
    if total_size == 0 {
        return Err(ValidationError::EmptyFile);
    }
    let count = part_count(total_size, part_size);
    if count > MAX_PARTS_PER_UPLOAD {
        return Err(ValidationError::TooManyParts {
            size: total_size,
            parts: count,
            max: MAX_PARTS_PER_UPLOAD,
        });
    }

    let mut parts = Vec::with_capacity(count as usize);
    let mut remaining = total_size;
    let mut part_number = 1;
    while remaining > 0 {
        let len = part_size.min(remaining);
        parts.push(PartRange { part_number, len });
        remaining -= len;
        part_number += 1;
    }
    Ok(parts)
}

/// One multipart upload of `key` into `bucket`.
pub struct MultipartUpload<'a> {
    client: &'a dyn ObjectStoreClient,
    bucket: &'a str,
    key: &'a str,
    content_type: Option<&'a str>,
    part_size: u64,
    observer: Option<&'a dyn ProgressObserver>,
    cancel: CancellationToken,
    state: UploadState,
    progress: UploadProgress,
}

impl<'a> MultipartUpload<'a> {
    pub fn new(
        client: &'a dyn ObjectStoreClient,
        bucket: &'a str,
        key: &'a str,
        part_size: u64,
    ) -> Self {
        Self {
            client,
            bucket,
            key,
            content_type: None,
            part_size,
            observer: None,
            cancel: CancellationToken::new(),
            state: UploadState::Created,
            progress: UploadProgress {
                bytes_uploaded: 0,
                total_bytes: 0,
            },
        }
    }

    pub fn with_content_type(mut self, content_type: Option<&'a str>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Cancelling `token` while the upload runs takes the abort path.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn progress(&self) -> UploadProgress {
        self.progress
    }

    /// Upload `total_size` bytes read sequentially from `reader`.
    pub async fn run<R>(
        &mut self,
        reader: &mut R,
        total_size: u64,
    ) -> Result<MultipartOutcome, MultipartError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let plan = plan_parts(total_size, self.part_size)?;
        self.progress = UploadProgress {
            bytes_uploaded: 0,
            total_bytes: total_size,
        };

        if self.cancel.is_cancelled() {
            return Err(MultipartError::Cancelled { upload_id: None });
        }

        let upload_id = self
            .client
            .create_multipart_upload(self.bucket, self.key, self.content_type)
            .await
            .map_err(MultipartError::Create)?;
        self.transition(UploadState::InProgress {
            upload_id: upload_id.clone(),
        });

        match self.send_and_complete(reader, &plan, &upload_id).await {
            Ok(parts) => {
                self.transition(UploadState::Completed {
                    upload_id: upload_id.clone(),
                });
                Ok(MultipartOutcome {
                    upload_id,
                    parts,
                    bytes_uploaded: self.progress.bytes_uploaded,
                })
            }
            Err(err) => Err(self.abort(&upload_id, err).await),
        }
    }

    async fn send_and_complete<R>(
        &mut self,
        reader: &mut R,
        plan: &[PartRange],
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, MultipartError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let cancel = self.cancel.clone();
        let cancelled = || MultipartError::Cancelled {
            upload_id: Some(upload_id.to_string()),
        };

        let mut parts = Vec::with_capacity(plan.len());
        for range in plan {
            let mut buffer = vec![0u8; range.len as usize];
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                read = reader.read_exact(&mut buffer) => {
                    read.map_err(|source| MultipartError::Read {
                        upload_id: upload_id.to_string(),
                        part_number: range.part_number,
                        source,
                    })?;
                }
            }

            let etag = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                sent = self.client.upload_part(
                    self.bucket,
                    self.key,
                    upload_id,
                    range.part_number,
                    Bytes::from(buffer),
                ) => sent.map_err(|source| MultipartError::Part {
                    upload_id: upload_id.to_string(),
                    part_number: range.part_number,
                    source,
                })?,
            };

            parts.push(CompletedPart {
                part_number: range.part_number,
                etag,
            });
            self.progress.bytes_uploaded += range.len;
            debug!(
                "upload {}: part {}/{} sent ({}/{} bytes)",
                upload_id,
                range.part_number,
                plan.len(),
                self.progress.bytes_uploaded,
                self.progress.total_bytes
            );
            if let Some(observer) = self.observer {
                observer.on_progress(&self.progress);
            }
        }

        self.transition(UploadState::AllPartsSent {
            upload_id: upload_id.to_string(),
        });

        parts.sort_by_key(|part| part.part_number);
        if let Some(gap) = first_gap(&parts) {
            return Err(MultipartError::NonContiguous {
                upload_id: upload_id.to_string(),
                part_number: gap,
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            done = self.client.complete_multipart_upload(self.bucket, self.key, upload_id, &parts) => {
                done.map_err(|source| MultipartError::Complete {
                    upload_id: upload_id.to_string(),
                    source,
                })?;
            }
        }

        Ok(parts)
    }

    async fn abort(&mut self, upload_id: &str, err: MultipartError) -> MultipartError {
        warn!("upload {} failed, aborting: {}", upload_id, err);
        self.transition(UploadState::Aborting {
            upload_id: upload_id.to_string(),
        });

        let cleaned_up = match self
            .client
            .abort_multipart_upload(self.bucket, self.key, upload_id)
            .await
        {
            Ok(()) => true,
            Err(abort_err) => {
                warn!(
                    "abort of upload {} for `{}` failed, incomplete upload may remain: {}",
                    upload_id, self.key, abort_err
                );
                false
            }
        };

        self.transition(UploadState::Aborted {
            upload_id: upload_id.to_string(),
            cleaned_up,
        });
        err
    }

    fn transition(&mut self, next: UploadState) {
        debug!("multipart `{}`: {:?} -> {:?}", self.key, self.state, next);
        self.state = next;
    }
}

/// First part number breaking the 1..=N sequence of a sorted part list.
fn first_gap(parts: &[CompletedPart]) -> Option<i32> {
    (1..)
        .zip(parts)
        .find(|(expected, part)| part.part_number != *expected)
        .map(|(expected, _)| expected)
}

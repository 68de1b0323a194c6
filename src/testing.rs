//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio_util::sync::CancellationToken;

use crate::{
    models::multipart::CompletedPart,
    services::object_store::{ObjectStoreClient, ObjectStoreError, ObjectStoreResult},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    Put { key: String, len: usize },
    Create { key: String },
    UploadPart { upload_id: String, part_number: i32, len: usize },
    Complete { upload_id: String, parts: Vec<i32> },
    Abort { upload_id: String },
}

/// Object store that records every call, keeps no payload bytes, and can be
/// told to fail specific operations.
#[derive(Default)]
pub struct RecordingObjectStore {
    calls: Mutex<Vec<StoreCall>>,
    uploaded: Mutex<HashMap<String, BTreeMap<i32, String>>>,
    next_id: AtomicU64,
    fail_put: bool,
    fail_create: bool,
    fail_part: Option<i32>,
    fail_complete: bool,
    fail_abort: bool,
    stall_part: Option<i32>,
    cancel_after_part: Option<(i32, CancellationToken)>,
}

impl RecordingObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_put(mut self) -> Self {
        self.fail_put = true;
        self
    }

    pub fn with_failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_failing_part(mut self, part_number: i32) -> Self {
        self.fail_part = Some(part_number);
        self
    }

    pub fn with_failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn with_failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    /// Never answer the upload of `part_number`.
    pub fn with_stalled_part(mut self, part_number: i32) -> Self {
        self.stall_part = Some(part_number);
        self
    }

    /// Cancel `token` right after `part_number` has been accepted.
    pub fn with_cancel_after_part(mut self, part_number: i32, token: CancellationToken) -> Self {
        self.cancel_after_part = Some((part_number, token));
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn abort_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Abort { upload_id } => Some(upload_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn injected(operation: &'static str, key: &str) -> ObjectStoreError {
    ObjectStoreError::Backend {
        operation,
        key: key.to_string(),
        message: "injected failure".into(),
    }
}

#[async_trait]
impl ObjectStoreClient for RecordingObjectStore {
    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        body: Bytes,
        _content_type: Option<&str>,
    ) -> ObjectStoreResult<()> {
        self.record(StoreCall::Put {
            key: key.to_string(),
            len: body.len(),
        });
        if self.fail_put {
            return Err(injected("put_object", key));
        }
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        _content_type: Option<&str>,
    ) -> ObjectStoreResult<String> {
        self.record(StoreCall::Create {
            key: key.to_string(),
        });
        if self.fail_create {
            return Err(injected("create_multipart_upload", key));
        }
        let upload_id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.uploaded
            .lock()
            .unwrap()
            .insert(upload_id.clone(), BTreeMap::new());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> ObjectStoreResult<String> {
        self.record(StoreCall::UploadPart {
            upload_id: upload_id.to_string(),
            part_number,
            len: body.len(),
        });
        if self.fail_part == Some(part_number) {
            return Err(injected("upload_part", key));
        }
        if self.stall_part == Some(part_number) {
            std::future::pending::<()>().await;
        }
        let etag = format!("etag-{}-{}", part_number, body.len());
        self.uploaded
            .lock()
            .unwrap()
            .get_mut(upload_id)
            .ok_or_else(|| ObjectStoreError::NoSuchUpload(upload_id.to_string()))?
            .insert(part_number, etag.clone());
        if let Some((after, token)) = &self.cancel_after_part {
            if *after == part_number {
                token.cancel();
            }
        }
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ObjectStoreResult<()> {
        self.record(StoreCall::Complete {
            upload_id: upload_id.to_string(),
            parts: parts.iter().map(|p| p.part_number).collect(),
        });
        if self.fail_complete {
            return Err(injected("complete_multipart_upload", key));
        }
        let uploaded = self.uploaded.lock().unwrap();
        let stored = uploaded
            .get(upload_id)
            .ok_or_else(|| ObjectStoreError::NoSuchUpload(upload_id.to_string()))?;
        if parts.len() != stored.len() {
            return Err(ObjectStoreError::InvalidPart {
                part_number: 0,
                reason: "part count mismatch".into(),
            });
        }
        for (expected, (part, (number, etag))) in (1..).zip(parts.iter().zip(stored.iter())) {
            if part.part_number != expected || part.part_number != *number {
                return Err(ObjectStoreError::InvalidPartOrder(part.part_number));
            }
            if part.etag != *etag {
                return Err(ObjectStoreError::InvalidPart {
                    part_number: part.part_number,
                    reason: "etag mismatch".into(),
                });
            }
        }
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> ObjectStoreResult<()> {
        self.record(StoreCall::Abort {
            upload_id: upload_id.to_string(),
        });
        if self.fail_abort {
            return Err(injected("abort_multipart_upload", key));
        }
        self.uploaded.lock().unwrap().remove(upload_id);
        Ok(())
    }
}

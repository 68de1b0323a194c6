//! In-process object store.
//!
//! Mirrors the S3 rules the pipeline depends on: ETags are the MD5 of the
//! body, and completing a multipart upload fails unless every uploaded part
//! is listed once, in ascending order, with its own ETag.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;
use uuid::Uuid;

use super::object_store::{ObjectStoreClient, ObjectStoreError, ObjectStoreResult};
use crate::models::multipart::CompletedPart;

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub etag: String,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

/// Object store that keeps everything in memory. Cloning shares the contents.
#[derive(Clone, Debug, Default)]
pub struct MemoryObjectStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Multipart uploads created but neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn etag_of(body: &[u8]) -> String {
    format!("{:x}", md5::compute(body))
}

fn pending_mut<'a>(
    inner: &'a mut Inner,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> ObjectStoreResult<&'a mut PendingUpload> {
    match inner.uploads.get_mut(upload_id) {
        Some(upload) if upload.bucket == bucket && upload.key == key => Ok(upload),
        _ => Err(ObjectStoreError::NoSuchUpload(upload_id.to_string())),
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<()> {
        let object = StoredObject {
            etag: etag_of(&body),
            body,
            content_type: content_type.map(str::to_string),
        };
        self.lock()
            .objects
            .insert((bucket.to_string(), key.to_string()), object);
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<String> {
        let upload_id = Uuid::new_v4().simple().to_string();
        self.lock().uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        debug!("memory store: created upload {} for {}/{}", upload_id, bucket, key);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> ObjectStoreResult<String> {
        if !(1..=10_000).contains(&part_number) {
            return Err(ObjectStoreError::InvalidPart {
                part_number,
                reason: "part number must be between 1 and 10000".into(),
            });
        }
        let etag = etag_of(&body);
        let mut inner = self.lock();
        let upload = pending_mut(&mut inner, bucket, key, upload_id)?;
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ObjectStoreResult<()> {
        let mut inner = self.lock();
        let upload = pending_mut(&mut inner, bucket, key, upload_id)?;

        if parts.is_empty() {
            return Err(ObjectStoreError::InvalidPart {
                part_number: 0,
                reason: "no parts listed".into(),
            });
        }

        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                return Err(ObjectStoreError::InvalidPartOrder(part.part_number));
            }
            previous = part.part_number;
            match upload.parts.get(&part.part_number) {
                Some((etag, _)) if *etag == part.etag => {}
                Some(_) => {
                    return Err(ObjectStoreError::InvalidPart {
                        part_number: part.part_number,
                        reason: "etag does not match".into(),
                    });
                }
                None => {
                    return Err(ObjectStoreError::InvalidPart {
                        part_number: part.part_number,
                        reason: "part was never uploaded".into(),
                    });
                }
            }
        }

        if let Some(missing) = upload
            .parts
            .keys()
            .find(|n| !parts.iter().any(|p| p.part_number == **n))
        {
            return Err(ObjectStoreError::InvalidPart {
                part_number: *missing,
                reason: "uploaded part missing from completion list".into(),
            });
        }

        let Some(upload) = inner.uploads.remove(upload_id) else {
            return Err(ObjectStoreError::NoSuchUpload(upload_id.to_string()));
        };
        let size = upload.parts.values().map(|(_, b)| b.len()).sum();
        let mut body = BytesMut::with_capacity(size);
        for (_, (_, chunk)) in upload.parts {
            body.extend_from_slice(&chunk);
        }
        let body = body.freeze();
        // S3 reports multipart ETags as `{md5}-{part count}`.
        let etag = format!("{}-{}", etag_of(&body), parts.len());
        inner.objects.insert(
            (upload.bucket, upload.key),
            StoredObject {
                body,
                content_type: upload.content_type,
                etag,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> ObjectStoreResult<()> {
        let mut inner = self.lock();
        pending_mut(&mut inner, bucket, key, upload_id)?;
        inner.uploads.remove(upload_id);
        debug!("memory store: aborted upload {}", upload_id);
        Ok(())
    }
}

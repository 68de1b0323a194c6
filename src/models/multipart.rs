//! Multipart upload parts and the request/response shapes around ingestion.

use serde::Serialize;

use super::file_record::FileRecord;

/// A part accepted by the object store, identified by its ordinal and the
/// acknowledgement token (ETag) the store returned for it.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number (1-based, contiguous).
    pub part_number: i32,

    /// ETag returned by `upload_part`.
    pub etag: String,
}

/// One planned part. Parts are read from the source back to back, in
/// `part_number` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartRange {
    pub part_number: i32,
    pub len: u64,
}

/// Cumulative progress of a multipart upload.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    /// Fraction in `0.0..=1.0`.
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_uploaded as f64 / self.total_bytes as f64
    }
}

/// How an upload was transferred to the object store.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// Single `put_object` call.
    Direct,
    /// create / upload_part × N / complete.
    Multipart,
}

/// One upload handed to the ingestion coordinator.
///
/// `body` must be seekable: it is read once to hash and again to upload.
pub struct UploadRequest<R> {
    pub body: R,
    pub filename: String,
    pub content_type: Option<String>,
    pub origin: Option<String>,
}

/// Result of a successful ingestion.
#[derive(Clone, Debug)]
pub struct IngestOutcome {
    pub record: FileRecord,
    pub strategy: UploadStrategy,
    /// Number of object-store parts; 1 for direct uploads.
    pub parts: usize,
}

/// JSON summary returned to clients after an upload.
#[derive(Serialize, Clone, Debug)]
pub struct UploadSummary {
    pub filename: String,
    pub hash: String,
    pub short_hash: String,
    pub size_bytes: i64,
    pub size_human: String,
    pub storage_key: String,
    pub url: String,
    pub info_path: String,
    pub strategy: UploadStrategy,
    pub parts: usize,
}

impl From<&IngestOutcome> for UploadSummary {
    fn from(outcome: &IngestOutcome) -> Self {
        let record = &outcome.record;
        Self {
            filename: record.filename.clone(),
            hash: record.filehash.clone(),
            short_hash: record.short_hash().to_string(),
            size_bytes: record.size_bytes,
            size_human: human_size(record.size_bytes.max(0) as u64),
            storage_key: record.storage_key.clone(),
            url: record.url.clone(),
            info_path: record.info_path(),
            strategy: outcome.strategy,
            parts: outcome.parts,
        }
    }
}

/// Render a byte count with binary units, e.g. `1.5 KiB`, `150.0 MiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

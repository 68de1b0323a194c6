//! Size-based choice between a single `put_object` and a multipart upload.

pub use crate::models::multipart::UploadStrategy;

const MIB: u64 = 1024 * 1024;

/// Uploads strictly larger than this go through the multipart protocol.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * MIB;

/// Size of every multipart part except the last.
pub const DEFAULT_PART_SIZE: u64 = 100 * MIB;

/// Smallest part S3 accepts for any part but the last.
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Largest single part S3 accepts.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;

/// S3 caps a multipart upload at 10,000 parts.
pub const MAX_PARTS_PER_UPLOAD: u64 = 10_000;

/// Pick the upload strategy for a body of `total_size` bytes.
///
/// `total_size == threshold` stays on the direct path. Empty bodies are
/// rejected before this is consulted.
pub fn select(total_size: u64, threshold: u64) -> UploadStrategy {
    if total_size > threshold {
        UploadStrategy::Multipart
    } else {
        UploadStrategy::Direct
    }
}

/// Number of parts needed to send `total_size` bytes in `part_size` pieces.
pub fn part_count(total_size: u64, part_size: u64) -> u64 {
    if part_size == 0 {
        return 0;
    }
    total_size.div_ceil(part_size)
}

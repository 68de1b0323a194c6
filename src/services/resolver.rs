//! Hash-prefix resolution.
//!
//! A prefix of at least 8 hex characters resolves to no record, exactly one
//! record, or several candidates ordered newest first. A full digest always
//! resolves to one record, the newest upload of that content, even when the
//! same content was ingested more than once. A unique hit counts as a
//! download for that record only.

use std::{cmp::Reverse, sync::Arc};
use thiserror::Error;
use tracing::debug;

use super::metadata_store::{MetadataError, MetadataStore};
use crate::{
    errors::ValidationError,
    models::{
        digest::{ContentDigest, DIGEST_HEX_LEN, SHORT_DIGEST_LEN},
        file_record::FileRecord,
    },
};

/// Shortest prefix accepted for lookups.
pub const MIN_PREFIX_LEN: usize = SHORT_DIGEST_LEN;

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    NotFound,
    /// The single match, with its download counter already incremented.
    Unique(FileRecord),
    /// Every match, newest first. Each record's full hash resolves uniquely.
    Ambiguous(Vec<FileRecord>),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Check length and alphabet of a client-supplied prefix and lowercase it.
pub fn normalize_prefix(prefix: &str) -> Result<String, ValidationError> {
    let prefix = prefix.trim();
    if prefix.len() < MIN_PREFIX_LEN {
        return Err(ValidationError::PrefixTooShort {
            len: prefix.len(),
            min: MIN_PREFIX_LEN,
        });
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidPrefix(prefix.to_string()));
    }
    if prefix.len() == DIGEST_HEX_LEN {
        let digest: ContentDigest = prefix
            .parse()
            .map_err(|_| ValidationError::InvalidPrefix(prefix.to_string()))?;
        return Ok(digest.to_hex());
    }
    Ok(prefix.to_ascii_lowercase())
}

/// Classify lookup results for a normalized `prefix`, ordering candidates
/// newest first with the row id as tie-break.
///
/// Rows that all carry `prefix` as their full digest are repeat uploads of
/// the same content; the newest one is the unique answer.
pub fn classify(prefix: &str, mut records: Vec<FileRecord>) -> Resolution {
    records.sort_by_key(|r| (Reverse(r.created_at), Reverse(r.id)));
    let same_content =
        prefix.len() == DIGEST_HEX_LEN && records.iter().all(|r| r.filehash == prefix);

    match records.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Unique(records.remove(0)),
        _ if same_content => Resolution::Unique(records.remove(0)),
        _ => Resolution::Ambiguous(records),
    }
}

#[derive(Clone)]
pub struct ContentResolver {
    metadata: Arc<dyn MetadataStore>,
}

impl ContentResolver {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    pub async fn resolve(&self, prefix: &str) -> Result<Resolution, ResolveError> {
        let prefix = normalize_prefix(prefix)?;
        let records = self.metadata.find_by_hash_prefix(&prefix).await?;
        debug!("prefix {} matched {} record(s)", prefix, records.len());

        match classify(&prefix, records) {
            Resolution::Unique(mut record) => {
                record.download_count = self.metadata.increment_download_count(record.id).await?;
                Ok(Resolution::Unique(record))
            }
            other => Ok(other),
        }
    }
}

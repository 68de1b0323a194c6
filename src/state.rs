//! Shared application state handed to every handler.

use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

use crate::services::{
    ingest::IngestService, metadata_store::MetadataStore, resolver::ContentResolver,
};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub ingest: IngestService,
    pub resolver: ContentResolver,
    pub metadata: Arc<dyn MetadataStore>,
    /// Directory request bodies are buffered in before hashing.
    pub spool_dir: PathBuf,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        ingest: IngestService,
        metadata: Arc<dyn MetadataStore>,
        spool_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            ingest,
            resolver: ContentResolver::new(metadata.clone()),
            metadata,
            spool_dir,
        }
    }
}

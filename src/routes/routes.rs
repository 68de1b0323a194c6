//! Defines the gateway's HTTP routes.
//!
//! ## Structure
//! - **Ingestion**
//!   - `POST /upload` -> multipart form upload (field `file`)
//!
//! - **Lookup**
//!   - `GET /files` -> most recent uploads
//!   - `GET /search?q=` -> search by name or digest
//!   - `GET /f/{prefix}` -> resolve a digest prefix (200, 300 or 404)
//!   - `GET /d/{prefix}` -> resolve and redirect to the object URL
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{download_file, file_info, list_files, search_files},
        health_handlers::{healthz, readyz},
        upload_handlers::upload_file,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Request bodies up to `max_upload_bytes` are accepted on
/// the upload route; the default axum limit applies everywhere else.
pub fn routes(max_upload_bytes: u64) -> Router<AppState> {
    let body_limit = usize::try_from(max_upload_bytes).unwrap_or(usize::MAX);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/files", get(list_files))
        .route("/search", get(search_files))
        .route("/f/{prefix}", get(file_info))
        .route("/d/{prefix}", get(download_file))
}

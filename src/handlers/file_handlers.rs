//! Lookup handlers over ingested files.
//!
//! - GET /files          -> most recent uploads
//! - GET /search?q=      -> name or digest substring search
//! - GET /f/{prefix}     -> resolve a digest prefix to its record
//! - GET /d/{prefix}     -> resolve and redirect to the stored object

use crate::{
    errors::AppError,
    models::file_record::FileRecord,
    services::resolver::Resolution,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

/// Page size for listings and searches.
pub const LISTING_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// Body of a `300 Multiple Choices` answer.
#[derive(Serialize)]
struct Candidates {
    prefix: String,
    candidates: Vec<FileRecord>,
}

/// `GET /files`
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileRecord>>, AppError> {
    let records = state.metadata.recent(LISTING_LIMIT).await?;
    Ok(Json(records))
}

/// `GET /search?q=`. An empty query lists the most recent uploads.
pub async fn search_files(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    let text = query.q.trim();
    let records = if text.is_empty() {
        state.metadata.recent(LISTING_LIMIT).await?
    } else {
        state.metadata.search(text, LISTING_LIMIT).await?
    };
    Ok(Json(records))
}

/// `GET /f/{prefix}`
pub async fn file_info(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Response, AppError> {
    match state.resolver.resolve(&prefix).await? {
        Resolution::Unique(record) => Ok(Json(record).into_response()),
        other => unresolved(prefix, other),
    }
}

/// `GET /d/{prefix}`
pub async fn download_file(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Response, AppError> {
    match state.resolver.resolve(&prefix).await? {
        Resolution::Unique(record) => {
            tracing::info!(
                "redirecting {} to {} (download #{})",
                prefix,
                record.url,
                record.download_count
            );
            Ok(Redirect::temporary(&record.url).into_response())
        }
        other => unresolved(prefix, other),
    }
}

fn unresolved(prefix: String, resolution: Resolution) -> Result<Response, AppError> {
    match resolution {
        Resolution::Ambiguous(candidates) => Ok((
            StatusCode::MULTIPLE_CHOICES,
            Json(Candidates { prefix, candidates }),
        )
            .into_response()),
        Resolution::NotFound => Err(AppError::not_found(format!(
            "no file matches hash prefix `{}`",
            prefix
        ))),
        Resolution::Unique(record) => Ok(Json(record).into_response()),
    }
}

//! `POST /upload`: buffer a multipart `file` field, then hand it to the
//! ingestion coordinator.
//!
//! The ingestion runs on its own task so it is not torn down mid-request when
//! the client goes away. The request holds a drop guard on the task's
//! cancellation token instead; a disconnect cancels the token and any
//! multipart upload in flight is aborted.

use crate::{
    errors::{AppError, ValidationError},
    models::multipart::{IngestOutcome, UploadRequest, UploadSummary},
    services::{hasher::spool_stream, ingest::IngestService},
    state::AppState,
};
use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError},
    },
    http::HeaderMap,
};
use futures::StreamExt;
use std::io;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;

/// Form field carrying the upload.
pub const FILE_FIELD: &str = "file";

/// Upload a file sent as `multipart/form-data` in the `file` field.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadSummary>, AppError> {
    let origin = client_origin(&headers);

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        return ingest_field(&state, field, origin).await.map(Json);
    }

    Err(ValidationError::MissingFile.into())
}

async fn ingest_field(
    state: &AppState,
    field: Field<'_>,
    origin: Option<String>,
) -> Result<UploadSummary, AppError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    if filename.trim().is_empty() {
        return Err(ValidationError::MissingFilename.into());
    }
    let content_type = field.content_type().map(str::to_string);

    let stream = field.map(|chunk| chunk.map_err(io::Error::other));
    let spooled = spool_stream(stream, &state.spool_dir)
        .await
        .map_err(spool_error)?;
    tracing::debug!("buffered `{}` ({} bytes)", filename, spooled.size);

    let request = UploadRequest {
        body: spooled.file,
        filename,
        content_type,
        origin,
    };

    let outcome = run_ingest(state.ingest.clone(), request).await?;
    Ok(UploadSummary::from(&outcome))
}

/// Run one ingestion on its own task. Dropping the returned future before it
/// resolves cancels the ingestion.
async fn run_ingest(
    ingest: IngestService,
    request: UploadRequest<File>,
) -> Result<IngestOutcome, AppError> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let task = tokio::spawn(async move { ingest.ingest(request, cancel).await });

    let result = task
        .await
        .map_err(|err| AppError::internal(format!("upload task failed: {}", err)))?;
    let _ = guard.disarm();

    Ok(result?)
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
pub fn client_origin(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

/// Map a spooling failure to the client error that caused it, if any.
fn spool_error(err: io::Error) -> AppError {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<MultipartError>())
    {
        Some(inner) => AppError::new(inner.status(), inner.body_text()),
        None => AppError::internal(format!("buffering upload failed: {}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{ingest::IngestConfig, metadata_store::tests::memory_store},
        testing::{RecordingObjectStore, StoreCall},
    };
    use axum::http::HeaderValue;
    use std::{sync::Arc, time::Duration};
    use tokio::io::AsyncWriteExt;

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn dropped_request_aborts_multipart_upload() {
        let store = Arc::new(RecordingObjectStore::new().with_stalled_part(2));
        let mut config = IngestConfig::new("files", "https://files.example");
        config.multipart_threshold = 4;
        config.part_size = 4;
        let ingest = IngestService::new(store.clone(), Arc::new(memory_store().await), config);

        let mut body = File::from_std(tempfile::tempfile().unwrap());
        body.write_all(b"0123456789ab").await.unwrap();
        body.flush().await.unwrap();
        let request = UploadRequest {
            body,
            filename: "big.bin".into(),
            content_type: None,
            origin: None,
        };

        let handler = tokio::spawn(run_ingest(ingest, request));
        let stalled = StoreCall::UploadPart {
            upload_id: "upload-1".into(),
            part_number: 2,
            len: 4,
        };
        wait_until(|| store.calls().contains(&stalled)).await;

        handler.abort();
        assert!(handler.await.unwrap_err().is_cancelled());

        wait_until(|| !store.abort_calls().is_empty()).await;
        assert_eq!(store.abort_calls(), vec!["upload-1".to_string()]);
        assert!(
            !store
                .calls()
                .iter()
                .any(|call| matches!(call, StoreCall::Complete { .. }))
        );
    }

    #[test]
    fn origin_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_origin(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn origin_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_origin(&headers).as_deref(), Some("198.51.100.4"));
        assert_eq!(client_origin(&HeaderMap::new()), None);
    }

    #[test]
    fn unrelated_io_errors_are_internal() {
        let err = spool_error(io::Error::other("disk full"));
        assert_eq!(err.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("disk full"));
    }
}

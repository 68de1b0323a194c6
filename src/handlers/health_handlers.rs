//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata database and the
//!   spool directory uploads are buffered in

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::SqlitePool;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const PROBE_BYTES: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Liveness probe. Always 200 OK, no I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// Readiness probe:
/// 1. `SELECT 1` against the metadata database.
/// 2. Write, read back and delete a probe file in the spool directory.
///
/// HTTP 200 when both pass, 503 otherwise, with a JSON report per check.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", check_sqlite(&state.db).await);
    checks.insert("spool", check_spool_dir(&state.spool_dir).await);

    let ready = checks.values().all(|c| c.ok);
    if !ready {
        tracing::warn!("readiness check failed: {:?}", checks);
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn check_sqlite(db: &SqlitePool) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(1) => CheckStatus::pass(),
        Ok(v) => CheckStatus::fail(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::fail(format!("error: {}", e)),
    }
}

async fn check_spool_dir(dir: &Path) -> CheckStatus {
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&probe, PROBE_BYTES).await {
        return CheckStatus::fail(format!("could not write probe file: {}", e));
    }

    let status = match fs::read(&probe).await {
        Ok(bytes) if bytes == PROBE_BYTES => CheckStatus::pass(),
        Ok(_) => CheckStatus::fail("probe file content mismatch".into()),
        Err(e) => CheckStatus::fail(format!("could not read probe file: {}", e)),
    };

    if let Err(e) = fs::remove_file(&probe).await {
        tracing::warn!("could not remove readiness probe {:?}: {}", probe, e);
    }
    status
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize, Debug)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn pass() -> Self {
        Self { ok: true, error: None }
    }

    fn fail(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

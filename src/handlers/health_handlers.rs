//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the database and the object store

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const PROBE: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Liveness only. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Writes, reads back and deletes a small probe object in the bucket.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let object_store_check = probe_object_store(&state).await;

    let overall_ok = sqlite_check.ok && object_store_check.ok;
    if !overall_ok {
        tracing::warn!(
            sqlite = ?sqlite_check.error,
            object_store = ?object_store_check.error,
            "readiness check failed"
        );
    }

    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("object_store", object_store_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_object_store(state: &AppState) -> CheckStatus {
    let key = format!(".readyz-{}", Uuid::new_v4());

    let body = stream::once(async { Ok(Bytes::from_static(PROBE)) }).boxed();
    if let Err(e) = state.blobs.put(&key, body).await {
        return CheckStatus::failed(format!("could not write probe object: {}", e));
    }

    let read = match state.blobs.get(&key).await {
        Ok(stream) => {
            stream
                .try_fold(Vec::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await
        }
        Err(e) => Err(e),
    };
    let check = match read {
        Ok(bytes) if bytes == PROBE => CheckStatus::ok(),
        Ok(_) => CheckStatus::failed("probe object content mismatch".into()),
        Err(e) => CheckStatus::failed(format!("could not read probe object: {}", e)),
    };

    if let Err(e) = state.blobs.delete(&key).await {
        tracing::warn!(key = %key, error = %e, "could not remove readiness probe object");
    }
    check
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

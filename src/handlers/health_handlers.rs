//! Health & readiness handlers.
//!
//! - GET /       -> plain-text liveness string
//! - GET /readyz -> readiness that checks catalog connectivity and disk I/O

use crate::services::media_store::MediaStore;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /`
///
/// Very small liveness probe — always returns 200 OK with a plain text
/// body. This endpoint should be cheap and never perform I/O.
pub async fn liveness() -> impl IntoResponse {
    (
        StatusCode::OK,
        "if you are seeing this message, the server is working",
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against the SQLite catalog (`SELECT 1`).
/// 2. Performs a best-effort write/read/delete under the chunk root.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(store): State<MediaStore>) -> impl IntoResponse {
    // 1) catalog check
    let catalog_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(store.catalog.pool())
        .await
    {
        Ok(v) if v == 1 => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // 2) disk write/read/delete check under the chunk root
    let tmp_path = store.storage_root.join(format!(".readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) => {
                if bytes == b"readyz" {
                    match fs::remove_file(&tmp_path).await {
                        Ok(_) => (true, None::<String>),
                        Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
                    }
                } else {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some("file content mismatch".to_string()))
                }
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some(format!("could not read tmp file: {}", e)))
            }
        },
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    };

    let catalog_ok = catalog_check.0;
    let disk_ok = disk_check.0;
    let overall_ok = catalog_ok && disk_ok;

    let mut checks = HashMap::new();
    checks.insert(
        "catalog",
        CheckStatus {
            ok: catalog_ok,
            error: catalog_check.1,
        },
    );
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_ok,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
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

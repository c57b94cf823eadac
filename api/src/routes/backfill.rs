//! Backfill Endpoints (관리자 전용)
//!
//! `x-admin-secret` 헤더만 본다. 쿼리 스트링의 시크릿은 무시한다.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::ApiError,
    services::backfill::{BackfillError, BackfillReport, BackfillRequest},
    services::signature::constant_time_eq,
    AppState,
};

pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

// ============ Request/Response Types ============

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub source_key: String,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub source_key: String,
    pub reset: bool,
}

// ============ Handlers ============

/// POST /backfill
///
/// 소스마다 한 페이지씩 처리한다. 바디는 비워도 된다.
///
/// ```json
/// { "results": [{ "name": "Pearls", "chain": "polygon", "processed": 100,
///                 "hasMore": true, "completed": false }],
///   "allCompleted": false }
/// ```
pub async fn run_backfill(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BackfillReport>, ApiError> {
    require_admin(&state.config, &headers)?;
    let request: BackfillRequest = parse_optional_json(&body)?;

    let report = state.backfill.run(&request).await.map_err(|e| match e {
        BackfillError::UnknownContract(address) => ApiError::NotFound(format!("contract {}", address)),
        BackfillError::Store(err) => ApiError::from(err),
    })?;
    Ok(Json(report))
}

/// POST /backfill/reset
pub async fn reset_cursor(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResetResponse>, ApiError> {
    require_admin(&state.config, &headers)?;
    let request: ResetRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let source_key = request.source_key.trim().to_string();
    if source_key.is_empty() {
        return Err(ApiError::ValidationError("source_key is required".to_string()));
    }

    let reset = state.backfill.reset(&source_key).await?;
    Ok(Json(ResetResponse { source_key, reset }))
}

// ============ Helpers ============

/// 시크릿이 설정되지 않았으면 모든 요청을 거부한다
fn require_admin(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = config.admin_secret.as_deref().ok_or(ApiError::Unauthorized)?;
    let provided = headers
        .get(ADMIN_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        tracing::warn!("backfill request with wrong admin secret");
        Err(ApiError::Unauthorized)
    }
}

fn parse_optional_json<T>(body: &[u8]) -> Result<T, ApiError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

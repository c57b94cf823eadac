//! Moralis Streams Webhook
//!
//! 서명은 파싱 전에 raw 바디로 검증한다. 응답 코드:
//!
//! ```text
//! 401  서명 없음/불일치, 시크릿 미설정
//! 200  {"status":"skipped","reason":...}   미확정 블록, 지원하지 않는 체인
//! 200  {"status":"ok","transfers":n,...}
//! 400  JSON 파싱 실패
//! 500  저장 실패
//! ```

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};

use crate::{
    error::ApiError,
    services::webhook::{WebhookError, WebhookOutcome},
    AppState,
};

pub const SIGNATURE_HEADER: &str = "x-signature";

/// POST /webhook
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let outcome = state.webhook.handle(&body, signature).await.map_err(|e| match e {
        WebhookError::Unauthorized => ApiError::InvalidSignature,
        WebhookError::Malformed(msg) => ApiError::BadRequest(msg),
        WebhookError::Store(err) => ApiError::from(err),
    })?;
    Ok(Json(outcome))
}

//! Compound Flag Endpoint
//!
//! 구매 전송을 "페이아웃 재투자로 산 것" 으로 표시한다. 호출 지갑은 외부 세션 레이어가
//! `x-wallet-address` 헤더로 넘겨준다.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, services::ledger::CompoundError, types::EthAddress, AppState};

pub const WALLET_HEADER: &str = "x-wallet-address";

#[derive(Debug, Deserialize)]
pub struct CompoundRequest {
    pub transfer_id: Option<Uuid>,
    pub is_compounded: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CompoundResponse {
    pub success: bool,
    pub transfer_id: Uuid,
    pub is_compounded: bool,
}

/// POST /compound
///
/// 검사 순서: 세션(401) → 필드(400) → 존재(404) → 소유자(403) → 구매 여부(400)
pub async fn set_compounded(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CompoundResponse>, ApiError> {
    let wallet = headers
        .get(WALLET_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| EthAddress::new(v).ok())
        .ok_or(ApiError::Unauthorized)?;

    let request: CompoundRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let (Some(transfer_id), Some(is_compounded)) = (request.transfer_id, request.is_compounded) else {
        return Err(ApiError::BadRequest("transfer_id and is_compounded are required".to_string()));
    };

    state
        .ledger
        .mark_compounded(transfer_id, wallet.as_str(), is_compounded)
        .await
        .map_err(|e| match e {
            CompoundError::NotFound => ApiError::NotFound("transfer".to_string()),
            CompoundError::NotOwner => ApiError::Forbidden(e.to_string()),
            CompoundError::NotPurchase => ApiError::BadRequest(e.to_string()),
            CompoundError::Store(err) => ApiError::from(err),
        })?;

    Ok(Json(CompoundResponse { success: true, transfer_id, is_compounded }))
}

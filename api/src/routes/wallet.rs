//! Wallet Endpoints
//!
//! 원장 행에서 지갑 집계를 다시 계산하고, 오늘 시세와 yield engine 으로 회수 예측을 만든다.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{
    db::WalletStats,
    error::ApiError,
    services::projection::{project, MarketPrices, Projection, ProjectionQuery},
    types::{EthAddress, NativeCurrency},
    AppState,
};

/// GET /wallets/:address/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<WalletStats>, ApiError> {
    let address = EthAddress::new(&address).map_err(ApiError::ValidationError)?;
    let stats = state.stats.wallet_stats(address.as_str()).await?;
    Ok(Json(stats))
}

/// GET /wallets/:address/projection
///
/// # Query
///
/// `mode=usd|pol|eth`, `boosters`, `booster_cost` (POL), `target_multiplier`,
/// `additional_pol`, `additional_eth`
pub async fn get_projection(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<ProjectionQuery>,
) -> Result<Json<Projection>, ApiError> {
    let address = EthAddress::new(&address).map_err(ApiError::ValidationError)?;
    let config = *state.stats.apr_config();
    query.validate(&config).map_err(ApiError::ValidationError)?;

    let (stats, pol, eth) = tokio::try_join!(
        state.stats.wallet_stats(address.as_str()),
        state.prices.today(NativeCurrency::Pol),
        state.prices.today(NativeCurrency::Eth),
    )
    .map_err(|e| {
        tracing::warn!(wallet = %address, "projection inputs unavailable: {:#}", e);
        ApiError::ServiceUnavailable("price feed".to_string())
    })?;

    let prices = MarketPrices { pol_usd: pol.usd, eth_usd: eth.usd };
    Ok(Json(project(&stats, prices, &query, &config)))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    use crate::db::{LedgerRepository, NewNftTransfer};
    use crate::routes::test_support::{json_body, TestApp};
    use crate::types::{Chain, ContractType, NativeCurrency};

    const HOLDER: &str = "0x4444444444444444444444444444444444444444";

    async fn seed_purchase(app: &TestApp) {
        let contract = app.store.add_contract(Chain::Polygon, "0xp", "Pearls", ContractType::Pearl);
        app.store.add_token_metadata(contract.id, "1", 10.0, NativeCurrency::Pol);
        app.store
            .upsert_transfers(&[NewNftTransfer {
                contract_id: contract.id,
                tx_hash: "0xbuy".to_string(),
                log_index: 0,
                block_number: 1,
                from_address: "0x0000000000000000000000000000000000000000".to_string(),
                to_address: HOLDER.to_string(),
                token_id: "1".to_string(),
                quantity: 10,
                is_purchase: true,
                native_value: Some(100.0),
                native_currency: Some(NativeCurrency::Pol),
                usd_value: Some(50.0),
                timestamp: Utc::now(),
            }])
            .await
            .unwrap();
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_stats() {
        let app = TestApp::new().await;
        seed_purchase(&app).await;

        let response = app.router().oneshot(get(&format!("/wallets/{}/stats", HOLDER))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total_pearls"], 10);
        assert_eq!(body["holdings_pol_value"], 100.0);
        assert_eq!(body["total_spent_usd"], 50.0);
        assert_eq!(body["effective_apr"], 12.0);

        let response = app.router().oneshot(get("/wallets/not-an-address/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_projection_in_pol() {
        let app = TestApp::new().await;
        seed_purchase(&app).await;
        app.prices.set_current("polygon-ecosystem-token", 0.5);
        app.prices.set_current("ethereum", 3000.0);

        let uri = format!("/wallets/{}/projection?mode=pol&boosters=4&target_multiplier=1", HOLDER);
        let response = app.router().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["mode"], "pol");
        assert_eq!(body["apr"], 14.0);
        assert_eq!(body["holdings"], 100.0);
        assert_eq!(body["booster_cost"], 1024.0);
        assert_eq!(body["prices"]["pol_usd"], 0.5);
        assert!(body["optimal"]["near_optimal"].is_array());
    }

    #[tokio::test]
    async fn test_projection_validation_and_price_outage() {
        let app = TestApp::new().await;

        let uri = format!("/wallets/{}/projection?boosters=99", HOLDER);
        let response = app.router().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        app.prices.fail_all(true);
        let uri = format!("/wallets/{}/projection", HOLDER);
        let response = app.router().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

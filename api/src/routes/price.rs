//! Price Endpoints
//!
//! 오늘의 POL/ETH USD 가격과 법정화폐 환율. 모두 `price_cache` 를 거친다.
//! 환율은 조회 실패 시 기본값으로 응답하고, 토큰 가격은 캐시 fallback 까지 없으면 503.

use axum::{extract::State, Json};
use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    error::ApiError,
    services::coingecko::FiatRates,
    services::price_cache::{PriceLookup, PriceSource},
    types::NativeCurrency,
    AppState,
};

#[derive(Debug, Serialize)]
pub struct TokenPrice {
    pub usd: f64,
    /// 실제 가격 날짜 (fallback 이면 오늘이 아닐 수 있음)
    pub date: NaiveDate,
    pub source: PriceSource,
}

impl From<PriceLookup> for TokenPrice {
    fn from(lookup: PriceLookup) -> Self {
        Self { usd: lookup.usd, date: lookup.date, source: lookup.source }
    }
}

#[derive(Debug, Serialize)]
pub struct TodayPricesResponse {
    pub pol: TokenPrice,
    pub eth: TokenPrice,
    pub fiat: FiatRates,
}

/// GET /prices/today
///
/// ```json
/// { "pol": { "usd": 0.52, "date": "2024-06-01", "source": "cache" },
///   "eth": { "usd": 3800.1, "date": "2024-06-01", "source": "upstream" },
///   "fiat": { "EUR": 0.92, "GBP": 0.79, "CAD": 1.36 } }
/// ```
pub async fn get_today_prices(State(state): State<AppState>) -> Result<Json<TodayPricesResponse>, ApiError> {
    let (pol, eth) = tokio::try_join!(
        state.prices.today(NativeCurrency::Pol),
        state.prices.today(NativeCurrency::Eth),
    )
    .map_err(|e| {
        tracing::warn!("today's prices unavailable: {:#}", e);
        ApiError::ServiceUnavailable("price feed".to_string())
    })?;
    let fiat = state.prices.fiat_rates().await;

    Ok(Json(TodayPricesResponse { pol: pol.into(), eth: eth.into(), fiat }))
}

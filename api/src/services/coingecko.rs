//! CoinGecko price provider
//!
//! API 키가 있으면 demo 키 헤더를 붙이고, 없으면 무료 tier 로 호출한다.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::error::SourceError;

/// USD 기준 법정화폐 환율 (1 USD = n 통화)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FiatRates {
    #[serde(rename = "EUR")]
    pub eur: f64,
    #[serde(rename = "GBP")]
    pub gbp: f64,
    #[serde(rename = "CAD")]
    pub cad: f64,
}

impl FiatRates {
    /// 응답에 값이 없을 때 쓰는 기본 환율
    pub const FALLBACK: FiatRates = FiatRates { eur: 0.92, gbp: 0.79, cad: 1.36 };

    pub fn entries(&self) -> [(&'static str, f64); 3] {
        [("EUR", self.eur), ("GBP", self.gbp), ("CAD", self.cad)]
    }
}

/// 가격 프로바이더 인터페이스
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// 특정 날짜의 USD 가격
    async fn historical_price(&self, coin_id: &str, date: NaiveDate) -> Result<f64, SourceError>;

    /// 현재 USD 가격
    async fn current_price(&self, coin_id: &str) -> Result<f64, SourceError>;

    /// USD → EUR/GBP/CAD
    async fn fiat_rates(&self) -> Result<FiatRates, SourceError>;
}

pub struct CoinGeckoClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CoinGeckoClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, SourceError> {
        let mut request = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Accept", "application/json")
            .query(query);
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status: status.as_u16(), body });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoClient {
    async fn historical_price(&self, coin_id: &str, date: NaiveDate) -> Result<f64, SourceError> {
        // CoinGecko history 는 dd-mm-yyyy 형식
        let cg_date = format!("{:02}-{:02}-{}", date.day(), date.month(), date.year());
        let data = self
            .get_json(
                &format!("/coins/{}/history", coin_id),
                &[("date", cg_date.as_str()), ("localization", "false")],
            )
            .await?;

        data.pointer("/market_data/current_price/usd")
            .and_then(Value::as_f64)
            .ok_or_else(|| SourceError::Malformed(format!("no price data for {} on {}", coin_id, date)))
    }

    async fn current_price(&self, coin_id: &str) -> Result<f64, SourceError> {
        let data = self
            .get_json("/simple/price", &[("ids", coin_id), ("vs_currencies", "usd")])
            .await?;

        data.get(coin_id)
            .and_then(|c| c.get("usd"))
            .and_then(Value::as_f64)
            .ok_or_else(|| SourceError::Malformed(format!("no price for {}", coin_id)))
    }

    async fn fiat_rates(&self) -> Result<FiatRates, SourceError> {
        let data = self
            .get_json("/simple/price", &[("ids", "usd-coin"), ("vs_currencies", "eur,gbp,cad")])
            .await?;

        let usdc = data.get("usd-coin");
        let rate = |key: &str, fallback: f64| {
            usdc.and_then(|u| u.get(key)).and_then(Value::as_f64).unwrap_or(fallback)
        };

        Ok(FiatRates {
            eur: rate("eur", FiatRates::FALLBACK.eur),
            gbp: rate("gbp", FiatRates::FALLBACK.gbp),
            cad: rate("cad", FiatRates::FALLBACK.cad),
        })
    }
}

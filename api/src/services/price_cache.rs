//! Price Cache Service
//!
//! 날짜 단위 USD 가격 조회. 캐시 우선, 없으면 CoinGecko 에서 가져와 저장한다.
//!
//! ```text
//!   price_on(currency, date)
//!     ├─ cache hit (과거 날짜, 또는 refresh 주기 안의 당일 값) ──▶ Cache
//!     ├─ legacy 심볼(MATIC) 행 ──▶ POL 로 복사 후 Cache
//!     ├─ upstream (coin id 목록을 순서대로) ──▶ upsert 후 Upstream
//!     └─ upstream 실패 ──▶ fallback_days 이내 가장 가까운 캐시 값 ──▶ Fallback
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::db::PriceRepository;
use crate::error::SourceError;
use crate::services::coingecko::{FiatRates, PriceProvider};
use crate::services::retry::{retry_transient, RetryPolicy};
use crate::types::NativeCurrency;

/// 캐시 동작 옵션
#[derive(Debug, Clone, Copy)]
pub struct PriceCacheOptions {
    /// 당일 가격을 다시 조회하기까지의 주기
    pub refresh: Duration,
    /// upstream 실패 시 허용하는 과거 캐시 범위 (일)
    pub fallback_days: i64,
    pub retry: RetryPolicy,
}

impl Default for PriceCacheOptions {
    fn default() -> Self {
        Self {
            refresh: Duration::from_secs(3600),
            fallback_days: 7,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Cache,
    Upstream,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLookup {
    pub usd: f64,
    pub date: NaiveDate,
    pub source: PriceSource,
}

impl PriceLookup {
    /// 외부 API 를 호출했는지 (throttle 판단용)
    pub fn hit_upstream(&self) -> bool {
        self.source != PriceSource::Cache
    }
}

pub struct PriceCache {
    repo: Arc<dyn PriceRepository>,
    provider: Arc<dyn PriceProvider>,
    options: PriceCacheOptions,
}

impl PriceCache {
    pub fn new(
        repo: Arc<dyn PriceRepository>,
        provider: Arc<dyn PriceProvider>,
        options: PriceCacheOptions,
    ) -> Self {
        Self { repo, provider, options }
    }

    /// CoinGecko coin id 후보. POL 은 리브랜딩 이전 id 로도 시도한다
    pub fn coin_ids(currency: NativeCurrency) -> &'static [&'static str] {
        match currency {
            NativeCurrency::Pol => &["polygon-ecosystem-token", "matic-network"],
            NativeCurrency::Eth => &["ethereum"],
        }
    }

    pub async fn today(&self, currency: NativeCurrency) -> Result<PriceLookup> {
        self.price_on(currency, Utc::now().date_naive()).await
    }

    /// `date` (UTC) 의 USD 가격
    pub async fn price_on(&self, currency: NativeCurrency, date: NaiveDate) -> Result<PriceLookup> {
        let symbol = currency.symbol();
        let is_today = date >= Utc::now().date_naive();

        if let Some(usd) = self.cached(symbol, date, is_today).await? {
            return Ok(PriceLookup { usd, date, source: PriceSource::Cache });
        }

        for legacy in currency.legacy_symbols() {
            if let Some(usd) = self.cached(legacy, date, is_today).await? {
                tracing::debug!(token = symbol, legacy = *legacy, %date, "migrating legacy price row");
                self.repo.upsert_price(symbol, date, usd).await?;
                return Ok(PriceLookup { usd, date, source: PriceSource::Cache });
            }
        }

        match self.fetch_upstream(currency, date, is_today).await {
            Ok(usd) => {
                self.repo.upsert_price(symbol, date, usd).await?;
                Ok(PriceLookup { usd, date, source: PriceSource::Upstream })
            }
            Err(err) => {
                tracing::warn!(token = symbol, %date, error = %err, "price fetch failed, trying cached fallback");
                match self.repo.nearest_price(symbol, date, self.options.fallback_days).await? {
                    Some(row) => Ok(PriceLookup { usd: row.usd_price, date: row.date, source: PriceSource::Fallback }),
                    None => Err(anyhow!("no {} price available for {}: {}", symbol, date, err)),
                }
            }
        }
    }

    /// USD → EUR/GBP/CAD. 당일 캐시 행으로 저장하며 실패 시 기본 환율
    pub async fn fiat_rates(&self) -> FiatRates {
        let today = Utc::now().date_naive();

        let mut cached = Vec::with_capacity(3);
        for (symbol, _) in FiatRates::FALLBACK.entries() {
            match self.cached(symbol, today, true).await {
                Ok(Some(rate)) => cached.push(rate),
                _ => break,
            }
        }
        if let [eur, gbp, cad] = cached[..] {
            return FiatRates { eur, gbp, cad };
        }

        let fetched = retry_transient(self.options.retry, "coingecko.fiat_rates", || {
            self.provider.fiat_rates()
        })
        .await;

        match fetched {
            Ok(rates) => {
                for (symbol, rate) in rates.entries() {
                    if let Err(e) = self.repo.upsert_price(symbol, today, rate).await {
                        tracing::warn!(symbol, error = %e, "failed to cache fiat rate");
                    }
                }
                rates
            }
            Err(err) => {
                tracing::warn!(error = %err, "fiat rate fetch failed, using defaults");
                FiatRates::FALLBACK
            }
        }
    }

    async fn cached(&self, token: &str, date: NaiveDate, is_today: bool) -> Result<Option<f64>> {
        let Some(row) = self.repo.get_price(token, date).await? else {
            return Ok(None);
        };
        if !is_today {
            return Ok(Some(row.usd_price));
        }
        let age = Utc::now().signed_duration_since(row.updated_at);
        let fresh = age.to_std().map(|age| age < self.options.refresh).unwrap_or(true);
        Ok(fresh.then_some(row.usd_price))
    }

    async fn fetch_upstream(
        &self,
        currency: NativeCurrency,
        date: NaiveDate,
        is_today: bool,
    ) -> Result<f64, SourceError> {
        let mut last_err = SourceError::NotConfigured(format!("no coin id for {}", currency));
        for coin_id in Self::coin_ids(currency) {
            let label = if is_today { "coingecko.current_price" } else { "coingecko.historical_price" };
            let result = retry_transient(self.options.retry, label, || async move {
                if is_today {
                    self.provider.current_price(coin_id).await
                } else {
                    self.provider.historical_price(coin_id, date).await
                }
            })
            .await;

            match result {
                Ok(usd) => return Ok(usd),
                Err(err) => {
                    tracing::debug!(coin_id, error = %err, "coin id lookup failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::mock::MemoryStore;
    use crate::services::coingecko::mock::StaticPrices;

    fn setup() -> (Arc<MemoryStore>, Arc<StaticPrices>, PriceCache) {
        let store = Arc::new(MemoryStore::new());
        let prices = Arc::new(StaticPrices::new());
        let cache = PriceCache::new(
            store.clone(),
            prices.clone(),
            PriceCacheOptions {
                refresh: Duration::from_secs(3600),
                fallback_days: 7,
                retry: RetryPolicy::once(Duration::ZERO),
            },
        );
        (store, prices, cache)
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (store, prices, cache) = setup();
        prices.set_historical("ethereum", day(2024, 5, 1), 3000.0);

        let first = cache.price_on(NativeCurrency::Eth, day(2024, 5, 1)).await.unwrap();
        assert_eq!(first.source, PriceSource::Upstream);
        assert_eq!(first.usd, 3000.0);
        assert_eq!(store.cached_price("ETH", day(2024, 5, 1)), Some(3000.0));

        let second = cache.price_on(NativeCurrency::Eth, day(2024, 5, 1)).await.unwrap();
        assert_eq!(second.source, PriceSource::Cache);
        assert!(!second.hit_upstream());
        assert_eq!(prices.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_pol_falls_back_to_previous_coin_id() {
        let (_, prices, cache) = setup();
        prices.set_historical("matic-network", day(2023, 1, 10), 0.9);

        let lookup = cache.price_on(NativeCurrency::Pol, day(2023, 1, 10)).await.unwrap();
        assert_eq!(lookup.usd, 0.9);
        assert_eq!(
            prices.calls(),
            vec![
                "history:polygon-ecosystem-token:2023-01-10".to_string(),
                "history:matic-network:2023-01-10".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_legacy_symbol_row_is_served_and_copied() {
        let (store, prices, cache) = setup();
        store.seed_price("MATIC", day(2023, 6, 1), 0.7);

        let lookup = cache.price_on(NativeCurrency::Pol, day(2023, 6, 1)).await.unwrap();
        assert_eq!(lookup.source, PriceSource::Cache);
        assert_eq!(lookup.usd, 0.7);
        assert_eq!(store.cached_price("POL", day(2023, 6, 1)), Some(0.7));
        assert!(prices.calls().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_uses_nearest_cached_price() {
        let (store, prices, cache) = setup();
        store.seed_price("ETH", day(2024, 4, 28), 2900.0);
        prices.fail_all(true);

        let lookup = cache.price_on(NativeCurrency::Eth, day(2024, 5, 1)).await.unwrap();
        assert_eq!(lookup.source, PriceSource::Fallback);
        assert_eq!(lookup.usd, 2900.0);
        assert_eq!(lookup.date, day(2024, 4, 28));
    }

    #[tokio::test]
    async fn test_upstream_failure_outside_window_is_error() {
        let (store, prices, cache) = setup();
        store.seed_price("ETH", day(2024, 3, 1), 2900.0);
        prices.fail_all(true);

        let result = cache.price_on(NativeCurrency::Eth, day(2024, 5, 1)).await;
        tokio_test::assert_err!(result);
        // 500 은 일시적 실패라서 한 번 재시도
        assert_eq!(prices.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_same_day_entry_refreshes_when_stale() {
        let (store, prices, cache) = setup();
        let today = Utc::now().date_naive();
        store.seed_price("POL", today, 0.40);
        prices.set_current("polygon-ecosystem-token", 0.45);

        let fresh = cache.today(NativeCurrency::Pol).await.unwrap();
        assert_eq!(fresh.usd, 0.40);
        assert!(prices.calls().is_empty());

        store.age_price("POL", today, chrono::Duration::hours(2));
        let refreshed = cache.today(NativeCurrency::Pol).await.unwrap();
        assert_eq!(refreshed.source, PriceSource::Upstream);
        assert_eq!(refreshed.usd, 0.45);
        assert_eq!(store.cached_price("POL", today), Some(0.45));
    }

    #[tokio::test]
    async fn test_past_entry_never_refreshed() {
        let (store, prices, cache) = setup();
        store.seed_price("ETH", day(2024, 1, 1), 2200.0);
        store.age_price("ETH", day(2024, 1, 1), chrono::Duration::days(30));

        let lookup = cache.price_on(NativeCurrency::Eth, day(2024, 1, 1)).await.unwrap();
        assert_eq!(lookup.source, PriceSource::Cache);
        assert!(prices.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fiat_rates_cached_for_the_day() {
        let (store, prices, cache) = setup();

        let rates = cache.fiat_rates().await;
        assert_eq!(rates, FiatRates::FALLBACK);
        assert_eq!(store.cached_price("EUR", Utc::now().date_naive()), Some(0.92));

        cache.fiat_rates().await;
        assert_eq!(prices.calls(), vec!["fiat".to_string()]);
    }

    #[tokio::test]
    async fn test_fiat_rates_default_on_failure() {
        let (_, prices, cache) = setup();
        prices.fail_all(true);
        assert_eq!(cache.fiat_rates().await, FiatRates::FALLBACK);
    }
}

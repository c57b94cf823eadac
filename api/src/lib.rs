//! Pearls API Library
//!
//! # Overview
//!
//! Pearls NFT 전송과 페이아웃을 하나의 멱등 원장으로 수집/정합하고,
//! 원장 집계로 회수(break-even) 예측을 계산하는 백엔드.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                             API                               │
//! │                                                               │
//! │   POST /backfill ──▶ BackfillService ─┐                       │
//! │   POST /webhook  ──▶ WebhookProcessor ─┼─▶ Normalizer ─▶ LedgerWriter
//! │                                        │        │               │
//! │                           Moralis ◀────┘   PriceCache ◀─ CoinGecko
//! │                                                               │
//! │   GET /wallets/:a/* ──▶ StatsService ─▶ yield_engine          │
//! └───────────────────────────────┬──────────────────────────────┘
//!                                 ▼
//!                        ┌────────────────┐
//!                        │   PostgreSQL    │
//!                        └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: 수집 파이프라인, 가격 캐시, yield 계산
//! - `db`: 저장소 trait 과 Postgres 구현
//! - `types`: 체인, 통화, wei 금액
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pearls_api::{config::Config, db::Database, AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Arc::new(Database::connect(&config.database_url).await?);
//!     let state = AppState::build(config, db, moralis, coingecko).await?;
//!     // ... 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod db;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use error::ApiError;
pub use db::Database;

use db::{Datastore, LedgerRepository, ReferenceRepository};
use services::backfill::{BackfillOptions, BackfillService};
use services::chain_source::ChainDataSource;
use services::coingecko::PriceProvider;
use services::ledger::LedgerWriter;
use services::normalizer::{Normalizer, PurchaseStrategy};
use services::price_cache::{PriceCache, PriceCacheOptions};
use services::retry::RetryPolicy;
use services::signature::SignatureVerifier;
use services::stats::StatsService;
use services::webhook::WebhookProcessor;
use services::yield_engine::AprConfig;

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger_repo: Arc<dyn LedgerRepository>,
    pub ledger: Arc<LedgerWriter>,
    pub backfill: Arc<BackfillService>,
    pub webhook: Arc<WebhookProcessor>,
    pub prices: Arc<PriceCache>,
    pub stats: Arc<StatsService>,
}

impl AppState {
    /// 저장소 하나와 외부 소스 두 개로 전체 서비스 그래프를 조립한다
    ///
    /// 구매 판정 전략은 여기서 한 번 결정된다 (seller-allowlist 면 판매자 목록을 읽는다).
    pub async fn build<D>(
        config: Config,
        store: Arc<D>,
        source: Arc<dyn ChainDataSource>,
        provider: Arc<dyn PriceProvider>,
    ) -> Result<Self>
    where
        D: Datastore + 'static,
    {
        let retry = RetryPolicy::once(config.retry_backoff);
        let reference: Arc<dyn ReferenceRepository> = store.clone();
        let ledger_repo: Arc<dyn LedgerRepository> = store.clone();

        let sellers = reference.list_seller_wallets().await?;
        let strategy = PurchaseStrategy::from_kind(config.purchase_strategy, &sellers);

        let prices = Arc::new(PriceCache::new(
            store.clone(),
            provider,
            PriceCacheOptions {
                refresh: config.price_refresh,
                fallback_days: config.price_fallback_days,
                retry,
            },
        ));
        let normalizer = Arc::new(Normalizer::new(
            strategy,
            prices.clone(),
            source.clone(),
            config.price_throttle,
            retry,
        ));
        let ledger = Arc::new(LedgerWriter::new(ledger_repo.clone()));

        let backfill = Arc::new(BackfillService::new(
            reference.clone(),
            store.clone(),
            ledger.clone(),
            normalizer.clone(),
            source,
            BackfillOptions { payout_feed: config.payout_feed, retry },
        ));
        let webhook = Arc::new(WebhookProcessor::new(
            SignatureVerifier::new(config.signature_algorithm, config.webhook_secret.clone()),
            reference.clone(),
            ledger.clone(),
            normalizer,
        ));
        let stats = Arc::new(StatsService::new(reference, ledger_repo.clone(), AprConfig::default()));

        Ok(Self {
            config: Arc::new(config),
            ledger_repo,
            ledger,
            backfill,
            webhook,
            prices,
            stats,
        })
    }
}

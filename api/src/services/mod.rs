//! Services Module
//!
//! 수집/정합 파이프라인과 yield 계산을 담당하는 서비스 레이어
//!
//! # Services
//! - `BackfillService`: 커서 기반 페이지 단위 pull 수집
//! - `WebhookProcessor`: Moralis Streams push 수집
//! - `Normalizer`: 이벤트 → 원장 행 (구매 판정, 금액 분할, 가격 부착)
//! - `LedgerWriter`: 멱등 upsert, 재투자 플래그
//! - `PriceCache`: 일 단위 USD 가격 캐시 (CoinGecko)
//! - `StatsService` / `projection`: 지갑 집계와 회수 예측
//! - `BackfillScheduler`: 프로세스 내 backfill 반복 실행

pub mod adapter;
pub mod backfill;
pub mod chain_source;
pub mod coingecko;
pub mod cursor;
pub mod ledger;
pub mod moralis;
pub mod normalizer;
pub mod price_cache;
pub mod projection;
pub mod retry;
pub mod scheduler;
pub mod signature;
pub mod stats;
pub mod webhook;
pub mod yield_engine;

pub use backfill::{BackfillOptions, BackfillReport, BackfillRequest, BackfillService};
pub use chain_source::ChainDataSource;
pub use coingecko::{CoinGeckoClient, FiatRates, PriceProvider};
pub use ledger::{CompoundError, LedgerWriter};
pub use moralis::MoralisClient;
pub use normalizer::{Normalizer, PurchaseStrategy};
pub use price_cache::{PriceCache, PriceCacheOptions};
pub use scheduler::BackfillScheduler;
pub use signature::SignatureVerifier;
pub use stats::StatsService;
pub use webhook::{WebhookError, WebhookOutcome, WebhookProcessor};

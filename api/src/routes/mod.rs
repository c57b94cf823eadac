//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크
//! - `/backfill`, `/backfill/reset` - 관리자 backfill (x-admin-secret)
//! - `/webhook` - Moralis Streams (x-signature)
//! - `/compound` - 재투자 플래그 (x-wallet-address)
//! - `/wallets/:address/*` - 지갑 집계, 회수 예측
//! - `/prices/today` - 오늘 시세

pub mod backfill;
pub mod compound;
pub mod health;
pub mod price;
pub mod wallet;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

/// 라우터 생성 (CORS / Trace 레이어는 main 에서 씌운다)
///
/// # Route Structure
///
/// ```text
/// GET  /health                      - 서버 상태 확인
///
/// POST /backfill                    - 소스별 한 페이지 수집
/// POST /backfill/reset              - 커서 초기화
/// POST /webhook                     - push 이벤트 수집
///
/// POST /compound                    - 재투자 플래그 변경
/// GET  /wallets/:address/stats      - 지갑 집계
/// GET  /wallets/:address/projection - 회수 예측
/// GET  /prices/today                - POL/ETH USD + 법정화폐 환율
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/backfill", post(backfill::run_backfill))
        .route("/backfill/reset", post(backfill::reset_cursor))
        .route("/webhook", post(webhook::receive_webhook))
        .route("/compound", post(compound::set_compounded))
        .route("/wallets/:address/stats", get(wallet::get_stats))
        .route("/wallets/:address/projection", get(wallet::get_projection))
        .route("/prices/today", get(price::get_today_prices))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Response;

    use crate::config::Config;
    use crate::db::repository::mock::MemoryStore;
    use crate::services::chain_source::mock::ScriptedSource;
    use crate::services::coingecko::mock::StaticPrices;
    use crate::AppState;

    pub(crate) const ADMIN_SECRET: &str = "admin-secret";

    pub(crate) struct TestApp {
        pub state: AppState,
        pub store: Arc<MemoryStore>,
        pub source: Arc<ScriptedSource>,
        pub prices: Arc<StaticPrices>,
    }

    impl TestApp {
        pub(crate) async fn new() -> Self {
            let config = Config::for_tests();
            let store = Arc::new(MemoryStore::new());
            let source = Arc::new(ScriptedSource::new());
            let prices = Arc::new(StaticPrices::new());
            let state = AppState::build(config, store.clone(), source.clone(), prices.clone())
                .await
                .unwrap();
            Self { state, store, source, prices }
        }

        pub(crate) fn router(&self) -> axum::Router {
            super::create_router(self.state.clone())
        }
    }

    pub(crate) async fn json_body(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

//! Pearls API Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Cron / Admin            Moralis Streams      Frontend │
//! └─────────────────────────────────────────────────────────────┘
//!            │ POST /backfill          │ POST /webhook     │ GET /wallets/*
//!            ▼                         ▼                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Services Layer                        ││
//! │  │  BackfillService  WebhookProcessor  Normalizer          ││
//! │  │  LedgerWriter     PriceCache        StatsService        ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Data Layer                            ││
//! │  │  PostgreSQL (ledger, cursors, price cache)              ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//!      Moralis Web3 API                    CoinGecko API
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pearls_api::{
    routes,
    services::{BackfillScheduler, CoinGeckoClient, MoralisClient},
    AppState, Config, Database,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "pearls_api=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Pearls API Server");

    let config = Config::from_env()?;
    tracing::info!(
        environment = ?config.environment,
        purchase_strategy = ?config.purchase_strategy,
        payout_feed = ?config.payout_feed,
        "📋 Configuration loaded"
    );

    let db = Database::connect(&config.database_url).await?;
    tracing::info!("🗄️  Database connected");

    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    // 외부 소스
    let moralis = MoralisClient::new(&config.moralis_base_url, config.moralis_api_key.clone(), config.http_timeout)?;
    let coingecko =
        CoinGeckoClient::new(&config.coingecko_base_url, config.coingecko_api_key.clone(), config.http_timeout)?;
    if config.moralis_api_key.is_none() {
        tracing::warn!("MORALIS_API_KEY not set, backfill sources will fail");
    }
    if config.webhook_secret.is_none() {
        tracing::warn!("MORALIS_STREAM_SECRET not set, all webhook deliveries will be rejected");
    }

    let port = config.port;
    let autorun = config.backfill_autorun.then_some(config.backfill_interval);
    let state = AppState::build(config, Arc::new(db), Arc::new(moralis), Arc::new(coingecko)).await?;
    tracing::info!("🔗 Services initialized");

    if let Some(interval) = autorun {
        let scheduler = BackfillScheduler::new(state.backfill.clone(), interval);
        tokio::spawn(async move {
            scheduler.run().await;
        });
        tracing::info!(interval_ms = interval.as_millis() as u64, "⏱️  Backfill scheduler started");
    }

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// 라우터 + 미들웨어
fn create_app(state: AppState) -> Router {
    use axum::http::{header, HeaderName, HeaderValue, Method};

    // 프로덕션은 ALLOWED_ORIGINS 만, 그 외 환경은 전부 허용
    let cors = if state.config.is_production() {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static("x-wallet-address"),
            ])
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    routes::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

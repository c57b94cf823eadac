//! Database Module
//!
//! PostgreSQL 기반 원장 저장소. `repository` 의 trait 들을 모두 구현한다.
//!
//! # Tables
//!
//! ```text
//! contracts          (address, chain)        UNIQUE
//! nft_transfers      (tx_hash, log_index)    UNIQUE  ← backfill / webhook 공통 키
//! payout_transfers   (tx_hash, to_address)   UNIQUE  ← fan-out 수신자 보존
//! sync_cursors       source_key              PK
//! price_cache        (token, date)           UNIQUE
//! payout_wallets / seller_wallets / token_metadata   참조 데이터
//! ```
//!
//! 동시성 제어는 `INSERT ... ON CONFLICT DO UPDATE` 하나로 처리한다.
//! backfill 과 webhook 이 같은 이벤트를 동시에 써도 행은 하나만 남는다.

mod models;
pub mod repository;

pub use models::*;
pub use repository::{
    CursorRepository, Datastore, LedgerRepository, PriceRepository, ReferenceRepository,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::types::Chain;

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10 (backfill 소스 병렬 + webhook 동시 처리)
    /// - min_connections: 1
    /// - acquire_timeout: 3초
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ReferenceRepository for Database {
    async fn list_contracts(&self) -> Result<Vec<Contract>> {
        let contracts = sqlx::query_as::<_, Contract>(
            r#"
            SELECT id, chain, address, name, contract_type, created_at
            FROM contracts
            ORDER BY chain, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(contracts)
    }

    async fn find_contracts(&self, chain: Chain, addresses: &[String]) -> Result<Vec<Contract>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let contracts = sqlx::query_as::<_, Contract>(
            r#"
            SELECT id, chain, address, name, contract_type, created_at
            FROM contracts
            WHERE chain = $1 AND address = ANY($2)
            "#,
        )
        .bind(chain.as_str())
        .bind(addresses)
        .fetch_all(&self.pool)
        .await?;

        Ok(contracts)
    }

    async fn list_payout_wallets(&self) -> Result<Vec<PayoutWallet>> {
        let wallets = sqlx::query_as::<_, PayoutWallet>(
            "SELECT id, address, label, created_at FROM payout_wallets",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(wallets)
    }

    async fn list_seller_wallets(&self) -> Result<Vec<SellerWallet>> {
        let wallets = sqlx::query_as::<_, SellerWallet>(
            "SELECT id, address, label, created_at FROM seller_wallets",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(wallets)
    }

    async fn list_token_metadata(&self) -> Result<Vec<TokenMetadata>> {
        let rows = sqlx::query_as::<_, TokenMetadata>(
            r#"
            SELECT contract_id, token_id, name, intrinsic_value, currency
            FROM token_metadata
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl LedgerRepository for Database {
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// NFT 전송 upsert
    ///
    /// 금액/가격은 한 번 기록되면 바뀌지 않는다. 비어 있던 경우에만 새 값으로 채운다.
    /// `is_compounded` 는 건드리지 않는다.
    async fn upsert_transfers(&self, rows: &[NewNftTransfer]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO nft_transfers (
                    id, contract_id, tx_hash, log_index, block_number,
                    from_address, to_address, token_id, quantity,
                    is_purchase, native_value, native_currency, usd_value, timestamp
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (tx_hash, log_index)
                DO UPDATE SET
                    contract_id = EXCLUDED.contract_id,
                    block_number = EXCLUDED.block_number,
                    from_address = EXCLUDED.from_address,
                    to_address = EXCLUDED.to_address,
                    token_id = EXCLUDED.token_id,
                    quantity = EXCLUDED.quantity,
                    is_purchase = nft_transfers.is_purchase OR EXCLUDED.is_purchase,
                    native_value = COALESCE(nft_transfers.native_value, EXCLUDED.native_value),
                    native_currency = COALESCE(nft_transfers.native_currency, EXCLUDED.native_currency),
                    usd_value = COALESCE(nft_transfers.usd_value, EXCLUDED.usd_value),
                    timestamp = EXCLUDED.timestamp
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(row.contract_id)
            .bind(&row.tx_hash)
            .bind(row.log_index)
            .bind(row.block_number)
            .bind(&row.from_address)
            .bind(&row.to_address)
            .bind(&row.token_id)
            .bind(row.quantity)
            .bind(row.is_purchase)
            .bind(row.native_value)
            .bind(row.native_currency.map(|c| c.symbol()))
            .bind(row.usd_value)
            .bind(row.timestamp)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("upsert nft transfer {}#{}", row.tx_hash, row.log_index))?;

            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn upsert_payouts(&self, rows: &[NewPayoutTransfer]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO payout_transfers (
                    id, payout_wallet_id, to_address, amount, native_currency,
                    usd_value, tx_hash, block_number, timestamp
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (tx_hash, to_address)
                DO UPDATE SET
                    payout_wallet_id = EXCLUDED.payout_wallet_id,
                    amount = EXCLUDED.amount,
                    native_currency = EXCLUDED.native_currency,
                    usd_value = COALESCE(payout_transfers.usd_value, EXCLUDED.usd_value),
                    block_number = EXCLUDED.block_number,
                    timestamp = EXCLUDED.timestamp
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(row.payout_wallet_id)
            .bind(&row.to_address)
            .bind(row.amount)
            .bind(row.native_currency.symbol())
            .bind(row.usd_value)
            .bind(&row.tx_hash)
            .bind(row.block_number)
            .bind(row.timestamp)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("upsert payout {} -> {}", row.tx_hash, row.to_address))?;

            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn find_transfer(&self, id: Uuid) -> Result<Option<NftTransfer>> {
        let transfer = sqlx::query_as::<_, NftTransfer>(
            r#"
            SELECT
                id, contract_id, tx_hash, log_index, block_number,
                from_address, to_address, token_id, quantity,
                is_purchase, native_value, native_currency, usd_value,
                is_compounded, timestamp, created_at
            FROM nft_transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transfer)
    }

    async fn set_compounded(&self, id: Uuid, is_compounded: bool) -> Result<()> {
        sqlx::query("UPDATE nft_transfers SET is_compounded = $2 WHERE id = $1")
            .bind(id)
            .bind(is_compounded)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn transfers_for_wallet(&self, address: &str) -> Result<Vec<NftTransfer>> {
        let transfers = sqlx::query_as::<_, NftTransfer>(
            r#"
            SELECT
                id, contract_id, tx_hash, log_index, block_number,
                from_address, to_address, token_id, quantity,
                is_purchase, native_value, native_currency, usd_value,
                is_compounded, timestamp, created_at
            FROM nft_transfers
            WHERE to_address = $1 OR from_address = $1
            ORDER BY block_number, log_index
            "#,
        )
        .bind(address.to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        Ok(transfers)
    }

    async fn payouts_for_wallet(&self, address: &str) -> Result<Vec<PayoutTransfer>> {
        let payouts = sqlx::query_as::<_, PayoutTransfer>(
            r#"
            SELECT
                id, payout_wallet_id, to_address, amount, native_currency,
                usd_value, tx_hash, block_number, timestamp, created_at
            FROM payout_transfers
            WHERE to_address = $1
            ORDER BY block_number
            "#,
        )
        .bind(address.to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        Ok(payouts)
    }
}

#[async_trait]
impl CursorRepository for Database {
    async fn get_cursor(&self, source_key: &str) -> Result<Option<SyncCursor>> {
        let cursor = sqlx::query_as::<_, SyncCursor>(
            r#"
            SELECT source_key, cursor, last_block, completed, updated_at
            FROM sync_cursors
            WHERE source_key = $1
            "#,
        )
        .bind(source_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cursor)
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (source_key, cursor, last_block, completed, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (source_key)
            DO UPDATE SET
                cursor = EXCLUDED.cursor,
                last_block = EXCLUDED.last_block,
                completed = EXCLUDED.completed,
                updated_at = NOW()
            "#,
        )
        .bind(&cursor.source_key)
        .bind(&cursor.cursor)
        .bind(cursor.last_block)
        .bind(cursor.completed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_cursor(&self, source_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_cursors WHERE source_key = $1")
            .bind(source_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PriceRepository for Database {
    async fn get_price(&self, token: &str, date: NaiveDate) -> Result<Option<CachedPrice>> {
        let price = sqlx::query_as::<_, CachedPrice>(
            r#"
            SELECT token, date, usd_price, created_at, updated_at
            FROM price_cache
            WHERE token = $1 AND date = $2
            "#,
        )
        .bind(token)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(price)
    }

    async fn upsert_price(&self, token: &str, date: NaiveDate, usd_price: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_cache (token, date, usd_price, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (token, date)
            DO UPDATE SET
                usd_price = EXCLUDED.usd_price,
                updated_at = NOW()
            "#,
        )
        .bind(token)
        .bind(date)
        .bind(usd_price)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn nearest_price(
        &self,
        token: &str,
        date: NaiveDate,
        within_days: i64,
    ) -> Result<Option<CachedPrice>> {
        let earliest = date - chrono::Duration::days(within_days);
        let price = sqlx::query_as::<_, CachedPrice>(
            r#"
            SELECT token, date, usd_price, created_at, updated_at
            FROM price_cache
            WHERE token = $1 AND date <= $2 AND date >= $3
            ORDER BY date DESC
            LIMIT 1
            "#,
        )
        .bind(token)
        .bind(date)
        .bind(earliest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(price)
    }
}

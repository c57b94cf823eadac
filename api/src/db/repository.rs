//! Repository traits
//!
//! 각 서비스는 구체 DB 타입이 아니라 아래 trait 객체를 생성자로 주입받는다.
//! PostgreSQL 구현은 `db/mod.rs` 의 `Database`, 테스트에서는 `mock::MemoryStore`.
//!
//! ```text
//!   BackfillService ──┐
//!   WebhookProcessor ─┼──▶ LedgerRepository / CursorRepository
//!   PriceCache ───────┴──▶ PriceRepository
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use super::models::{
    CachedPrice, Contract, NewNftTransfer, NewPayoutTransfer, NftTransfer, PayoutTransfer,
    PayoutWallet, SellerWallet, SyncCursor, TokenMetadata,
};
use crate::types::Chain;

/// 참조 데이터 (컨트랙트, 지갑, 토큰 메타데이터)
#[async_trait]
pub trait ReferenceRepository: Send + Sync {
    async fn list_contracts(&self) -> Result<Vec<Contract>>;

    /// 주소 목록을 한 번의 쿼리로 해석
    async fn find_contracts(&self, chain: Chain, addresses: &[String]) -> Result<Vec<Contract>>;

    async fn list_payout_wallets(&self) -> Result<Vec<PayoutWallet>>;
    async fn list_seller_wallets(&self) -> Result<Vec<SellerWallet>>;
    async fn list_token_metadata(&self) -> Result<Vec<TokenMetadata>>;
}

/// 원장 쓰기/읽기
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    /// `(tx_hash, log_index)` 기준 upsert. 한 트랜잭션으로 기록하고 기록된 행 수 반환
    async fn upsert_transfers(&self, rows: &[NewNftTransfer]) -> Result<u64>;

    /// `(tx_hash, to_address)` 기준 upsert
    async fn upsert_payouts(&self, rows: &[NewPayoutTransfer]) -> Result<u64>;

    async fn find_transfer(&self, id: Uuid) -> Result<Option<NftTransfer>>;

    /// 생성 이후 변경 가능한 유일한 필드
    async fn set_compounded(&self, id: Uuid, is_compounded: bool) -> Result<()>;

    /// 지갑이 보내거나 받은 모든 NFT 전송
    async fn transfers_for_wallet(&self, address: &str) -> Result<Vec<NftTransfer>>;

    async fn payouts_for_wallet(&self, address: &str) -> Result<Vec<PayoutTransfer>>;
}

/// 동기화 커서
#[async_trait]
pub trait CursorRepository: Send + Sync {
    async fn get_cursor(&self, source_key: &str) -> Result<Option<SyncCursor>>;
    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()>;

    /// 커서 삭제 (fresh 상태로 되돌림). 존재했으면 true
    async fn reset_cursor(&self, source_key: &str) -> Result<bool>;
}

/// 가격 캐시 저장소
#[async_trait]
pub trait PriceRepository: Send + Sync {
    async fn get_price(&self, token: &str, date: NaiveDate) -> Result<Option<CachedPrice>>;
    async fn upsert_price(&self, token: &str, date: NaiveDate, usd_price: f64) -> Result<()>;

    /// `date` 이전 `within_days` 일 이내의 가장 가까운 가격
    async fn nearest_price(
        &self,
        token: &str,
        date: NaiveDate,
        within_days: i64,
    ) -> Result<Option<CachedPrice>>;
}

/// 모든 저장소 역할을 한 번에 구현하는 datastore
pub trait Datastore:
    ReferenceRepository + LedgerRepository + CursorRepository + PriceRepository
{
}

impl<T> Datastore for T where
    T: ReferenceRepository + LedgerRepository + CursorRepository + PriceRepository
{
}

// 테스트용 Mock 구현
#[cfg(test)]
pub mod mock {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::RwLock;

    use crate::types::{ContractType, NativeCurrency};

    /// SQL upsert 규칙을 그대로 흉내내는 인메모리 datastore
    #[derive(Default)]
    pub struct MemoryStore {
        contracts: RwLock<Vec<Contract>>,
        payout_wallets: RwLock<Vec<PayoutWallet>>,
        seller_wallets: RwLock<Vec<SellerWallet>>,
        token_metadata: RwLock<Vec<TokenMetadata>>,
        transfers: RwLock<HashMap<(String, i64), NftTransfer>>,
        payouts: RwLock<HashMap<(String, String), PayoutTransfer>>,
        cursors: RwLock<HashMap<String, SyncCursor>>,
        prices: RwLock<HashMap<(String, NaiveDate), CachedPrice>>,
        contract_lookups: RwLock<u32>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_contract(&self, chain: Chain, address: &str, name: &str, kind: ContractType) -> Contract {
            let contract = Contract {
                id: Uuid::new_v4(),
                chain: chain.as_str().to_string(),
                address: address.to_lowercase(),
                name: name.to_string(),
                contract_type: kind.as_str().to_string(),
                created_at: Utc::now(),
            };
            self.contracts.write().unwrap().push(contract.clone());
            contract
        }

        pub fn add_payout_wallet(&self, address: &str) -> PayoutWallet {
            let wallet = PayoutWallet {
                id: Uuid::new_v4(),
                address: address.to_lowercase(),
                label: "payouts".to_string(),
                created_at: Utc::now(),
            };
            self.payout_wallets.write().unwrap().push(wallet.clone());
            wallet
        }

        pub fn add_seller_wallet(&self, address: &str) {
            self.seller_wallets.write().unwrap().push(SellerWallet {
                id: Uuid::new_v4(),
                address: address.to_lowercase(),
                label: "seller".to_string(),
                created_at: Utc::now(),
            });
        }

        pub fn add_token_metadata(&self, contract_id: Uuid, token_id: &str, value: f64, currency: NativeCurrency) {
            self.token_metadata.write().unwrap().push(TokenMetadata {
                contract_id,
                token_id: token_id.to_string(),
                name: format!("Token #{}", token_id),
                intrinsic_value: value,
                currency: currency.symbol().to_string(),
            });
        }

        pub fn seed_price(&self, token: &str, date: NaiveDate, usd_price: f64) {
            let now = Utc::now();
            self.prices.write().unwrap().insert(
                (token.to_string(), date),
                CachedPrice { token: token.to_string(), date, usd_price, created_at: now, updated_at: now },
            );
        }

        pub fn age_price(&self, token: &str, date: NaiveDate, age: chrono::Duration) {
            if let Some(row) = self.prices.write().unwrap().get_mut(&(token.to_string(), date)) {
                row.updated_at = row.updated_at - age;
            }
        }

        pub fn transfer_count(&self) -> usize {
            self.transfers.read().unwrap().len()
        }

        pub fn payout_count(&self) -> usize {
            self.payouts.read().unwrap().len()
        }

        pub fn all_transfers(&self) -> Vec<NftTransfer> {
            let mut rows: Vec<_> = self.transfers.read().unwrap().values().cloned().collect();
            rows.sort_by(|a, b| (&a.tx_hash, a.log_index).cmp(&(&b.tx_hash, b.log_index)));
            rows
        }

        pub fn all_payouts(&self) -> Vec<PayoutTransfer> {
            self.payouts.read().unwrap().values().cloned().collect()
        }

        pub fn cached_price(&self, token: &str, date: NaiveDate) -> Option<f64> {
            self.prices.read().unwrap().get(&(token.to_string(), date)).map(|p| p.usd_price)
        }

        pub fn contract_lookups(&self) -> u32 {
            *self.contract_lookups.read().unwrap()
        }
    }

    #[async_trait]
    impl ReferenceRepository for MemoryStore {
        async fn list_contracts(&self) -> Result<Vec<Contract>> {
            Ok(self.contracts.read().unwrap().clone())
        }

        async fn find_contracts(&self, chain: Chain, addresses: &[String]) -> Result<Vec<Contract>> {
            *self.contract_lookups.write().unwrap() += 1;
            Ok(self
                .contracts
                .read()
                .unwrap()
                .iter()
                .filter(|c| c.chain == chain.as_str() && addresses.contains(&c.address))
                .cloned()
                .collect())
        }

        async fn list_payout_wallets(&self) -> Result<Vec<PayoutWallet>> {
            Ok(self.payout_wallets.read().unwrap().clone())
        }

        async fn list_seller_wallets(&self) -> Result<Vec<SellerWallet>> {
            Ok(self.seller_wallets.read().unwrap().clone())
        }

        async fn list_token_metadata(&self) -> Result<Vec<TokenMetadata>> {
            Ok(self.token_metadata.read().unwrap().clone())
        }
    }

    #[async_trait]
    impl LedgerRepository for MemoryStore {
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        async fn upsert_transfers(&self, rows: &[NewNftTransfer]) -> Result<u64> {
            let mut transfers = self.transfers.write().unwrap();
            for row in rows {
                let key = (row.tx_hash.clone(), row.log_index);
                let existing = transfers.get(&key).cloned();
                let merged = NftTransfer {
                    id: existing.as_ref().map(|e| e.id).unwrap_or_else(Uuid::new_v4),
                    contract_id: row.contract_id,
                    tx_hash: row.tx_hash.clone(),
                    log_index: row.log_index,
                    block_number: row.block_number,
                    from_address: row.from_address.clone(),
                    to_address: row.to_address.clone(),
                    token_id: row.token_id.clone(),
                    quantity: row.quantity,
                    is_purchase: row.is_purchase
                        || existing.as_ref().map(|e| e.is_purchase).unwrap_or(false),
                    native_value: existing.as_ref().and_then(|e| e.native_value).or(row.native_value),
                    native_currency: existing
                        .as_ref()
                        .and_then(|e| e.native_currency.clone())
                        .or_else(|| row.native_currency.map(|c| c.symbol().to_string())),
                    usd_value: existing.as_ref().and_then(|e| e.usd_value).or(row.usd_value),
                    is_compounded: existing.as_ref().map(|e| e.is_compounded).unwrap_or(false),
                    timestamp: row.timestamp,
                    created_at: existing.as_ref().map(|e| e.created_at).unwrap_or_else(Utc::now),
                };
                transfers.insert(key, merged);
            }
            Ok(rows.len() as u64)
        }

        async fn upsert_payouts(&self, rows: &[NewPayoutTransfer]) -> Result<u64> {
            let mut payouts = self.payouts.write().unwrap();
            for row in rows {
                let key = (row.tx_hash.clone(), row.to_address.clone());
                let existing = payouts.get(&key).cloned();
                payouts.insert(
                    key,
                    PayoutTransfer {
                        id: existing.as_ref().map(|e| e.id).unwrap_or_else(Uuid::new_v4),
                        payout_wallet_id: row.payout_wallet_id,
                        to_address: row.to_address.clone(),
                        amount: row.amount,
                        native_currency: row.native_currency.symbol().to_string(),
                        usd_value: existing.as_ref().and_then(|e| e.usd_value).or(row.usd_value),
                        tx_hash: row.tx_hash.clone(),
                        block_number: row.block_number,
                        timestamp: row.timestamp,
                        created_at: existing.as_ref().map(|e| e.created_at).unwrap_or_else(Utc::now),
                    },
                );
            }
            Ok(rows.len() as u64)
        }

        async fn find_transfer(&self, id: Uuid) -> Result<Option<NftTransfer>> {
            Ok(self.transfers.read().unwrap().values().find(|t| t.id == id).cloned())
        }

        async fn set_compounded(&self, id: Uuid, is_compounded: bool) -> Result<()> {
            if let Some(row) = self.transfers.write().unwrap().values_mut().find(|t| t.id == id) {
                row.is_compounded = is_compounded;
            }
            Ok(())
        }

        async fn transfers_for_wallet(&self, address: &str) -> Result<Vec<NftTransfer>> {
            let address = address.to_lowercase();
            Ok(self
                .transfers
                .read()
                .unwrap()
                .values()
                .filter(|t| t.to_address == address || t.from_address == address)
                .cloned()
                .collect())
        }

        async fn payouts_for_wallet(&self, address: &str) -> Result<Vec<PayoutTransfer>> {
            let address = address.to_lowercase();
            Ok(self
                .payouts
                .read()
                .unwrap()
                .values()
                .filter(|p| p.to_address == address)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl CursorRepository for MemoryStore {
        async fn get_cursor(&self, source_key: &str) -> Result<Option<SyncCursor>> {
            Ok(self.cursors.read().unwrap().get(source_key).cloned())
        }

        async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
            self.cursors
                .write()
                .unwrap()
                .insert(cursor.source_key.clone(), cursor.clone());
            Ok(())
        }

        async fn reset_cursor(&self, source_key: &str) -> Result<bool> {
            Ok(self.cursors.write().unwrap().remove(source_key).is_some())
        }
    }

    #[async_trait]
    impl PriceRepository for MemoryStore {
        async fn get_price(&self, token: &str, date: NaiveDate) -> Result<Option<CachedPrice>> {
            Ok(self.prices.read().unwrap().get(&(token.to_string(), date)).cloned())
        }

        async fn upsert_price(&self, token: &str, date: NaiveDate, usd_price: f64) -> Result<()> {
            let now = Utc::now();
            let mut prices = self.prices.write().unwrap();
            let created_at = prices
                .get(&(token.to_string(), date))
                .map(|p| p.created_at)
                .unwrap_or(now);
            prices.insert(
                (token.to_string(), date),
                CachedPrice { token: token.to_string(), date, usd_price, created_at, updated_at: now },
            );
            Ok(())
        }

        async fn nearest_price(
            &self,
            token: &str,
            date: NaiveDate,
            within_days: i64,
        ) -> Result<Option<CachedPrice>> {
            let earliest = date - chrono::Duration::days(within_days);
            Ok(self
                .prices
                .read()
                .unwrap()
                .values()
                .filter(|p| p.token == token && p.date <= date && p.date >= earliest)
                .max_by_key(|p| p.date)
                .cloned())
        }
    }
}

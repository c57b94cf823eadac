//! Database Models
//!
//! Ledger rows (NFT transfers, payouts), reference data, sync cursors and the
//! price cache. Addresses and hashes are always stored lowercase.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{Chain, ContractType, NativeCurrency};

/// 추적 대상 컨트랙트 (참조 데이터)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Contract {
    pub id: Uuid,
    pub chain: String,
    pub address: String,
    pub name: String,
    pub contract_type: String,
    pub created_at: DateTime<Utc>,
}

impl Contract {
    pub fn chain(&self) -> Option<Chain> {
        self.chain.parse().ok()
    }

    pub fn kind(&self) -> Option<ContractType> {
        self.contract_type.parse().ok()
    }
}

/// 페이아웃 지갑
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PayoutWallet {
    pub id: Uuid,
    pub address: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// 판매자 지갑 (seller-allowlist 전략 전용)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SellerWallet {
    pub id: Uuid,
    pub address: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// 토큰별 내재 가치 (보유 평가액 계산용)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TokenMetadata {
    pub contract_id: Uuid,
    pub token_id: String,
    pub name: String,
    pub intrinsic_value: f64,
    pub currency: String,
}

/// NFT 전송 원장 행
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NftTransfer {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub from_address: String,
    pub to_address: String,
    pub token_id: String,
    pub quantity: i64,
    pub is_purchase: bool,
    pub native_value: Option<f64>,
    pub native_currency: Option<String>,
    pub usd_value: Option<f64>,
    pub is_compounded: bool,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// 정규화된 NFT 전송 (원장 upsert 입력)
///
/// `(tx_hash, log_index)` 가 유일 키. `is_compounded` 는 포함하지 않는다.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNftTransfer {
    pub contract_id: Uuid,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub from_address: String,
    pub to_address: String,
    pub token_id: String,
    pub quantity: i64,
    pub is_purchase: bool,
    pub native_value: Option<f64>,
    pub native_currency: Option<NativeCurrency>,
    pub usd_value: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// 페이아웃 원장 행
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PayoutTransfer {
    pub id: Uuid,
    pub payout_wallet_id: Uuid,
    pub to_address: String,
    pub amount: f64,
    pub native_currency: String,
    pub usd_value: Option<f64>,
    pub tx_hash: String,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// 정규화된 페이아웃 (원장 upsert 입력). 유일 키는 `(tx_hash, to_address)`
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayoutTransfer {
    pub payout_wallet_id: Uuid,
    pub to_address: String,
    pub amount: f64,
    pub native_currency: NativeCurrency,
    pub usd_value: Option<f64>,
    pub tx_hash: String,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
}

/// 소스별 페이지네이션 상태
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct SyncCursor {
    pub source_key: String,
    pub cursor: Option<String>,
    pub last_block: i64,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

/// 일 단위 USD 가격
#[derive(Debug, Clone, FromRow)]
pub struct CachedPrice {
    pub token: String,
    pub date: NaiveDate,
    pub usd_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 지갑 집계 (원장에서 언제든 재계산 가능한 읽기 전용 projection)
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WalletStats {
    pub wallet_address: String,
    pub total_pearls: i64,
    pub total_boosters: i64,
    pub pol_pearls: i64,
    pub eth_pearls: i64,
    pub total_spent_usd: f64,
    pub total_spent_excluding_compounded_usd: f64,
    pub total_spent_pol: f64,
    pub total_spent_eth: f64,
    pub total_booster_spent_pol: f64,
    pub total_compounded_usd: f64,
    pub total_compounded_pol: f64,
    pub total_compounded_eth: f64,
    pub holdings_pol_value: f64,
    pub holdings_eth_value: f64,
    pub total_earned_usd: f64,
    pub total_earned_pol: f64,
    pub total_earned_eth: f64,
    pub effective_apr: f64,
    pub net_position_usd: f64,
    pub net_pol: f64,
    pub net_eth: f64,
}

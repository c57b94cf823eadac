//! Wallet stats projection
//!
//! 원장 행만으로 다시 계산할 수 있는 지갑 집계. 저장하지 않고 요청마다 계산한다.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::db::{
    Contract, LedgerRepository, NftTransfer, PayoutTransfer, ReferenceRepository, TokenMetadata,
    WalletStats,
};
use crate::services::yield_engine::AprConfig;
use crate::types::{Chain, ContractType, NativeCurrency};

pub struct StatsService {
    reference: Arc<dyn ReferenceRepository>,
    ledger: Arc<dyn LedgerRepository>,
    apr: AprConfig,
}

impl StatsService {
    pub fn new(reference: Arc<dyn ReferenceRepository>, ledger: Arc<dyn LedgerRepository>, apr: AprConfig) -> Self {
        Self { reference, ledger, apr }
    }

    pub fn apr_config(&self) -> &AprConfig {
        &self.apr
    }

    pub async fn wallet_stats(&self, wallet: &str) -> Result<WalletStats> {
        let wallet = wallet.to_lowercase();
        let (contracts, metadata, transfers, payouts) = tokio::try_join!(
            self.reference.list_contracts(),
            self.reference.list_token_metadata(),
            self.ledger.transfers_for_wallet(&wallet),
            self.ledger.payouts_for_wallet(&wallet),
        )?;
        Ok(compute_wallet_stats(&wallet, &transfers, &payouts, &contracts, &metadata, &self.apr))
    }
}

/// 집계 규칙
///
/// - 보유 수량: 받은 수량 − 보낸 수량 (컨트랙트 × 토큰 단위, 음수는 0)
/// - 지출: 지갑이 받은 구매 전송의 금액 합. `excluding_compounded` 는 재투자 구매 제외
/// - 보유 평가액: 보유 수량 × 토큰 내재 가치 (메타데이터 통화 기준)
/// - 수익: 지갑이 받은 페이아웃 합
/// - 순포지션: 수익 − 재투자를 제외한 지출
pub fn compute_wallet_stats(
    wallet: &str,
    transfers: &[NftTransfer],
    payouts: &[PayoutTransfer],
    contracts: &[Contract],
    metadata: &[TokenMetadata],
    apr: &AprConfig,
) -> WalletStats {
    let wallet = wallet.to_lowercase();
    let contracts: HashMap<Uuid, &Contract> = contracts.iter().map(|c| (c.id, c)).collect();
    let values: HashMap<(Uuid, &str), &TokenMetadata> =
        metadata.iter().map(|m| ((m.contract_id, m.token_id.as_str()), m)).collect();

    let mut stats = WalletStats { wallet_address: wallet.clone(), ..Default::default() };

    // (contract, token) 별 순보유 수량
    let mut held: HashMap<(Uuid, &str), i64> = HashMap::new();
    for t in transfers {
        if t.to_address == wallet {
            *held.entry((t.contract_id, t.token_id.as_str())).or_default() += t.quantity;
        }
        if t.from_address == wallet {
            *held.entry((t.contract_id, t.token_id.as_str())).or_default() -= t.quantity;
        }

        if t.to_address != wallet || !t.is_purchase {
            continue;
        }
        let kind = contracts.get(&t.contract_id).and_then(|c| c.kind());
        let currency = t.native_currency.as_deref().and_then(|c| c.parse::<NativeCurrency>().ok());
        let native = t.native_value.unwrap_or(0.0);
        let usd = t.usd_value.unwrap_or(0.0);

        stats.total_spent_usd += usd;
        match currency {
            Some(NativeCurrency::Pol) => stats.total_spent_pol += native,
            Some(NativeCurrency::Eth) => stats.total_spent_eth += native,
            None => {}
        }
        if kind == Some(ContractType::Booster) && currency == Some(NativeCurrency::Pol) {
            stats.total_booster_spent_pol += native;
        }

        if t.is_compounded {
            stats.total_compounded_usd += usd;
            match currency {
                Some(NativeCurrency::Pol) => stats.total_compounded_pol += native,
                Some(NativeCurrency::Eth) => stats.total_compounded_eth += native,
                None => {}
            }
        } else {
            stats.total_spent_excluding_compounded_usd += usd;
        }
    }

    for ((contract_id, token_id), quantity) in held {
        let quantity = quantity.max(0);
        if quantity == 0 {
            continue;
        }
        let Some(contract) = contracts.get(&contract_id) else {
            continue;
        };
        match contract.kind() {
            Some(ContractType::Pearl) => {
                stats.total_pearls += quantity;
                match contract.chain() {
                    Some(Chain::Polygon) => stats.pol_pearls += quantity,
                    Some(Chain::Base) => stats.eth_pearls += quantity,
                    None => {}
                }
                if let Some(meta) = values.get(&(contract_id, token_id)) {
                    let value = quantity as f64 * meta.intrinsic_value;
                    match meta.currency.parse::<NativeCurrency>() {
                        Ok(NativeCurrency::Pol) => stats.holdings_pol_value += value,
                        Ok(NativeCurrency::Eth) => stats.holdings_eth_value += value,
                        Err(_) => {}
                    }
                }
            }
            Some(ContractType::Booster) => stats.total_boosters += quantity,
            None => {}
        }
    }

    for p in payouts.iter().filter(|p| p.to_address == wallet) {
        stats.total_earned_usd += p.usd_value.unwrap_or(0.0);
        match p.native_currency.parse::<NativeCurrency>() {
            Ok(NativeCurrency::Pol) => stats.total_earned_pol += p.amount,
            Ok(NativeCurrency::Eth) => stats.total_earned_eth += p.amount,
            Err(_) => {}
        }
    }

    stats.effective_apr = apr.apr(stats.total_boosters.clamp(0, u32::MAX as i64) as u32);
    stats.net_position_usd = stats.total_earned_usd - stats.total_spent_excluding_compounded_usd;
    stats.net_pol = stats.total_earned_pol - (stats.total_spent_pol - stats.total_compounded_pol);
    stats.net_eth = stats.total_earned_eth - (stats.total_spent_eth - stats.total_compounded_eth);
    stats
}

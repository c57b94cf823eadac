//! Transfer Normalizer & Classifier
//!
//! 어댑터가 만든 이벤트를 원장 행(`NewNftTransfer`, `NewPayoutTransfer`)으로 바꾼다.
//!
//! # Value attribution
//!
//! 한 트랜잭션으로 여러 토큰을 산 경우 이벤트마다 트랜잭션 전체 금액이 실려 온다.
//! 같은 tx_hash 를 공유하는 N 개 전송은 금액을 wei 단위로 N 등분하고,
//! 나머지는 log_index 가 작은 순서로 1 wei 씩 더해 합계가 정확히 tx.value 가 되게 한다.
//! backfill 페이지 경계에 걸린 트랜잭션은 N 을 트랜잭션의 ERC-1155 로그 수로 정한다.
//!
//! # Price lookup
//!
//! 배치 안에서 (통화, 날짜) 당 한 번만 조회하고, 외부 호출 사이에는 고정 지연을 둔다.
//! 가격 조회 실패는 usd_value = None 으로 남긴다.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::PurchaseStrategyKind;
use crate::db::{NewNftTransfer, NewPayoutTransfer, PayoutWallet, SellerWallet};
use crate::services::adapter::{NativeEvent, TransferEvent, TxDetail};
use crate::services::chain_source::ChainDataSource;
use crate::services::price_cache::PriceCache;
use crate::services::retry::{retry_transient, RetryPolicy};
use crate::types::{Chain, NativeCurrency, Wei};

/// 구매 판정 규칙 (시작 시 한 번 결정)
#[derive(Debug, Clone)]
pub enum PurchaseStrategy {
    /// 트랜잭션에 네이티브 금액이 있으면 구매. 2차 거래도 포함
    AnyNativeValue,
    /// 판매자 지갑에서 나간 전송만 구매
    SellerAllowlist { sellers: HashSet<String> },
}

impl PurchaseStrategy {
    pub fn from_kind(kind: PurchaseStrategyKind, sellers: &[SellerWallet]) -> Self {
        match kind {
            PurchaseStrategyKind::AnyNativeValue => PurchaseStrategy::AnyNativeValue,
            PurchaseStrategyKind::SellerAllowlist => {
                tracing::warn!(
                    sellers = sellers.len(),
                    "seller-allowlist purchase classification is deprecated; secondary sales will not count as purchases"
                );
                PurchaseStrategy::SellerAllowlist {
                    sellers: sellers.iter().map(|s| s.address.to_lowercase()).collect(),
                }
            }
        }
    }

    pub fn is_purchase(&self, from_address: &str, tx_value: Option<&Wei>) -> bool {
        match self {
            PurchaseStrategy::AnyNativeValue => tx_value.map(|v| !v.is_zero()).unwrap_or(false),
            PurchaseStrategy::SellerAllowlist { sellers } => sellers.contains(&from_address.to_lowercase()),
        }
    }
}

/// 컨트랙트가 확정된 전송 이벤트
#[derive(Debug, Clone)]
pub struct ResolvedTransfer {
    pub contract_id: Uuid,
    pub event: TransferEvent,
}

/// 배치가 잘린 페이지인지 여부
///
/// 이웃 페이지가 있으면 첫/마지막 항목의 트랜잭션은 전송 일부가 그 페이지에 있을 수 있다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageEdges {
    /// 커서로 요청한 페이지 (앞 페이지가 있다)
    pub has_previous: bool,
    /// 다음 커서가 있다
    pub has_next: bool,
}

pub struct Normalizer {
    strategy: PurchaseStrategy,
    prices: Arc<PriceCache>,
    source: Arc<dyn ChainDataSource>,
    throttle: Duration,
    retry: RetryPolicy,
}

impl Normalizer {
    pub fn new(
        strategy: PurchaseStrategy,
        prices: Arc<PriceCache>,
        source: Arc<dyn ChainDataSource>,
        throttle: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self { strategy, prices, source, throttle, retry }
    }

    /// NFT 전송 배치 정규화
    ///
    /// `known_values` 는 웹훅 envelope 의 `txs` 처럼 이미 알고 있는 트랜잭션 금액.
    /// 이벤트에도 없고 여기에도 없으면 트랜잭션을 조회한다 (tx_hash 당 한 번).
    /// `edges` 에 걸린 트랜잭션은 분할 인원을 트랜잭션 로그에서 센다.
    pub async fn normalize_transfers(
        &self,
        chain: Chain,
        transfers: Vec<ResolvedTransfer>,
        known_values: &HashMap<String, Wei>,
        edges: PageEdges,
    ) -> Vec<NewNftTransfer> {
        let mut edge_txs: HashSet<String> = HashSet::new();
        if edges.has_previous {
            edge_txs.extend(transfers.first().map(|t| t.event.tx_hash.clone()));
        }
        if edges.has_next {
            edge_txs.extend(transfers.last().map(|t| t.event.tx_hash.clone()));
        }

        // (tx_hash, log_index) 중복 제거, 마지막 값 유지
        let mut unique: BTreeMap<(String, i64), ResolvedTransfer> = BTreeMap::new();
        for t in transfers {
            unique.insert((t.event.tx_hash.clone(), t.event.log_index), t);
        }

        // tx_hash → log_index 오름차순 (BTreeMap 순회 순서)
        let mut groups: HashMap<String, Vec<i64>> = HashMap::new();
        for (tx_hash, log_index) in unique.keys() {
            groups.entry(tx_hash.clone()).or_default().push(*log_index);
        }

        let mut tx_values: HashMap<String, Option<Wei>> = HashMap::new();
        for ((tx_hash, _), t) in &unique {
            if tx_values.get(tx_hash).map(Option::is_some).unwrap_or(false) {
                continue;
            }
            if let Some(value) = t.event.tx_value {
                tx_values.insert(tx_hash.clone(), Some(value));
            }
        }

        let mut details: HashMap<String, TxDetail> = HashMap::new();
        for tx_hash in groups.keys() {
            if tx_values.contains_key(tx_hash) {
                continue;
            }
            let value = match known_values.get(tx_hash) {
                Some(value) => Some(*value),
                None => self.lookup_tx(tx_hash, chain).await.map(|detail| {
                    let value = detail.value;
                    details.insert(tx_hash.clone(), detail);
                    value
                }),
            };
            tx_values.insert(tx_hash.clone(), value);
        }

        // 페이지 경계의 트랜잭션은 보이는 전송만으로 나누면 합계가 tx.value 를 넘는다
        for tx_hash in &edge_txs {
            let has_value = tx_values.get(tx_hash).copied().flatten().map_or(false, |v| !v.is_zero());
            let Some(group) = groups.get_mut(tx_hash).filter(|_| has_value) else {
                continue;
            };
            if !details.contains_key(tx_hash) {
                if let Some(detail) = self.lookup_tx(tx_hash, chain).await {
                    details.insert(tx_hash.clone(), detail);
                }
            }
            let contract = unique
                .iter()
                .find(|((tx, _), _)| tx == tx_hash)
                .and_then(|(_, t)| t.event.contract_address.clone());
            let logs = details
                .get(tx_hash)
                .map(|d| d.transfer_log_indexes(contract.as_deref()))
                .unwrap_or_default();
            if logs.is_empty() {
                tracing::warn!(tx_hash = %tx_hash, %chain, visible = group.len(), "transfer logs unavailable, splitting over visible transfers");
                continue;
            }
            group.extend(logs);
            group.sort_unstable();
            group.dedup();
        }

        // tx_hash 당 한 번 분할
        let shares: HashMap<&str, Vec<Wei>> = groups
            .iter()
            .filter_map(|(tx_hash, group)| {
                let value = tx_values.get(tx_hash).copied().flatten()?;
                Some((tx_hash.as_str(), value.split_even(group.len())))
            })
            .collect();

        let currency = chain.native_currency();
        let mut prices = PriceMemo::new(&self.prices, self.throttle);
        let mut rows = Vec::with_capacity(unique.len());

        for ((tx_hash, log_index), t) in unique {
            let event = t.event;
            let tx_value = tx_values.get(&tx_hash).copied().flatten();
            let is_purchase = self.strategy.is_purchase(&event.from_address, tx_value.as_ref());

            let share = match (groups.get(&tx_hash), shares.get(tx_hash.as_str())) {
                (Some(group), Some(shares)) if is_purchase => group
                    .binary_search(&log_index)
                    .ok()
                    .and_then(|position| shares.get(position).copied()),
                _ => None,
            };

            let native_value = share.map(|w| w.to_native());
            let usd_value = match native_value {
                Some(native) if native > 0.0 => prices
                    .usd(currency, event.timestamp.date_naive())
                    .await
                    .map(|price| native * price),
                _ => None,
            };

            rows.push(NewNftTransfer {
                contract_id: t.contract_id,
                tx_hash,
                log_index,
                block_number: event.block_number,
                from_address: event.from_address,
                to_address: event.to_address,
                token_id: event.token_id,
                quantity: event.quantity,
                is_purchase,
                native_value,
                native_currency: native_value.map(|_| currency),
                usd_value,
                timestamp: event.timestamp,
            });
        }

        rows
    }

    /// 페이아웃 지갑에서 나간 0 보다 큰 네이티브 전송만 페이아웃으로 기록
    ///
    /// 같은 트랜잭션에서 같은 수신자에게 간 leg 는 합산한다.
    pub async fn normalize_payouts(
        &self,
        chain: Chain,
        events: Vec<NativeEvent>,
        wallets: &[PayoutWallet],
    ) -> Vec<NewPayoutTransfer> {
        let wallet_ids: HashMap<String, Uuid> =
            wallets.iter().map(|w| (w.address.to_lowercase(), w.id)).collect();

        let mut merged: BTreeMap<(String, String), (Uuid, NativeEvent)> = BTreeMap::new();
        for event in events {
            let Some(wallet_id) = wallet_ids.get(&event.from_address) else {
                continue;
            };
            if event.value.is_zero() {
                continue;
            }
            let key = (event.tx_hash.clone(), event.to_address.clone());
            match merged.get_mut(&key) {
                Some((_, existing)) => existing.value = existing.value + event.value,
                None => {
                    merged.insert(key, (*wallet_id, event));
                }
            }
        }

        let currency = chain.native_currency();
        let mut prices = PriceMemo::new(&self.prices, self.throttle);
        let mut rows = Vec::with_capacity(merged.len());

        for (_, (payout_wallet_id, event)) in merged {
            let amount = event.value.to_native();
            let usd_value = prices
                .usd(currency, event.timestamp.date_naive())
                .await
                .map(|price| amount * price);

            rows.push(NewPayoutTransfer {
                payout_wallet_id,
                to_address: event.to_address,
                amount,
                native_currency: currency,
                usd_value,
                tx_hash: event.tx_hash,
                block_number: event.block_number,
                timestamp: event.timestamp,
            });
        }

        rows
    }

    async fn lookup_tx(&self, tx_hash: &str, chain: Chain) -> Option<TxDetail> {
        let result = retry_transient(self.retry, "moralis.transaction", || {
            self.source.transaction(tx_hash, chain)
        })
        .await;

        match result {
            Ok(detail) => Some(detail),
            Err(err) => {
                tracing::warn!(tx_hash, %chain, error = %err, "transaction lookup failed");
                None
            }
        }
    }
}

/// 배치 단위 가격 메모 + throttle
struct PriceMemo<'a> {
    cache: &'a PriceCache,
    throttle: Duration,
    memo: HashMap<(NativeCurrency, NaiveDate), Option<f64>>,
    delay_next: bool,
}

impl<'a> PriceMemo<'a> {
    fn new(cache: &'a PriceCache, throttle: Duration) -> Self {
        Self { cache, throttle, memo: HashMap::new(), delay_next: false }
    }

    async fn usd(&mut self, currency: NativeCurrency, date: NaiveDate) -> Option<f64> {
        if let Some(price) = self.memo.get(&(currency, date)) {
            return *price;
        }

        if self.delay_next && !self.throttle.is_zero() {
            tokio::time::sleep(self.throttle).await;
        }

        let price = match self.cache.price_on(currency, date).await {
            Ok(lookup) => {
                self.delay_next = lookup.hit_upstream();
                Some(lookup.usd)
            }
            Err(err) => {
                tracing::warn!(%currency, %date, error = %err, "price unavailable, usd_value left empty");
                self.delay_next = true;
                None
            }
        };

        self.memo.insert((currency, date), price);
        price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    use crate::db::repository::mock::MemoryStore;
    use crate::services::chain_source::mock::ScriptedSource;
    use crate::services::coingecko::mock::StaticPrices;
    use crate::services::price_cache::PriceCacheOptions;

    const POL: u128 = 1_000_000_000_000_000_000;

    struct Fixture {
        source: Arc<ScriptedSource>,
        prices: Arc<StaticPrices>,
        normalizer: Normalizer,
    }

    fn fixture(strategy: PurchaseStrategy) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let prices = Arc::new(StaticPrices::new());
        let source = Arc::new(ScriptedSource::new());
        let cache = Arc::new(PriceCache::new(
            store,
            prices.clone(),
            PriceCacheOptions { retry: RetryPolicy::no_retry(), ..Default::default() },
        ));
        let normalizer = Normalizer::new(
            strategy,
            cache,
            source.clone(),
            Duration::ZERO,
            RetryPolicy::no_retry(),
        );
        Fixture { source, prices, normalizer }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn transfer(tx_hash: &str, log_index: i64, value: Option<Wei>) -> ResolvedTransfer {
        ResolvedTransfer {
            contract_id: Uuid::nil(),
            event: TransferEvent {
                tx_hash: tx_hash.to_string(),
                log_index,
                block_number: 100,
                timestamp: ts(),
                from_address: "0x0000000000000000000000000000000000000000".to_string(),
                to_address: "0xbuyer".to_string(),
                token_id: "1".to_string(),
                quantity: 1,
                contract_address: None,
                tx_value: value,
            },
        }
    }

    fn wei(amount: u128) -> Wei {
        Wei(amount.into())
    }

    #[tokio::test]
    async fn test_batch_purchase_split_and_priced() {
        let f = fixture(PurchaseStrategy::AnyNativeValue);
        f.prices.set_historical("polygon-ecosystem-token", ts().date_naive(), 0.5);

        let rows = f
            .normalizer
            .normalize_transfers(
                Chain::Polygon,
                vec![transfer("0xabc", 1, Some(wei(20 * POL))), transfer("0xabc", 2, Some(wei(20 * POL)))],
                &HashMap::new(),
                PageEdges::default(),
            )
            .await;

        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.is_purchase);
            assert_eq!(row.native_value, Some(10.0));
            assert_eq!(row.native_currency, Some(NativeCurrency::Pol));
            assert_eq!(row.usd_value, Some(5.0));
        }
        // 같은 날짜는 한 번만 조회
        assert_eq!(f.prices.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_split_preserves_total_wei() {
        let f = fixture(PurchaseStrategy::AnyNativeValue);
        let total = wei(10);

        let rows = f
            .normalizer
            .normalize_transfers(
                Chain::Base,
                vec![transfer("0xdef", 5, Some(total)), transfer("0xdef", 3, Some(total)), transfer("0xdef", 9, Some(total))],
                &HashMap::new(),
                PageEdges::default(),
            )
            .await;

        let shares = total.split_even(3);
        assert_eq!(shares.iter().copied().sum::<Wei>(), total);
        // 나머지 1 wei 는 가장 작은 log_index 에
        assert_eq!(rows[0].log_index, 3);
        assert_eq!(shares[0], wei(4));
        assert_eq!(rows[0].native_value, Some(wei(4).to_native()));
        assert_eq!(rows[2].native_value, Some(wei(3).to_native()));
    }

    #[tokio::test]
    async fn test_edge_group_split_over_all_transaction_logs() {
        let f = fixture(PurchaseStrategy::AnyNativeValue);
        // 0xedge 는 로그 0, 1, 2 중 2 만 이 페이지에 있다
        f.source.set_transaction_with_logs("0xedge", wei(10), "0xpearl", &[0, 1, 2]);
        let mut tail = transfer("0xedge", 2, Some(wei(10)));
        tail.event.contract_address = Some("0xpearl".to_string());

        let rows = f
            .normalizer
            .normalize_transfers(
                Chain::Base,
                vec![transfer("0xinner", 0, Some(wei(6))), transfer("0xinner", 1, Some(wei(6))), tail],
                &HashMap::new(),
                PageEdges { has_previous: false, has_next: true },
            )
            .await;

        let edge = rows.iter().find(|r| r.tx_hash == "0xedge").unwrap();
        // 10 wei / 3 = [4, 3, 3], 로그 2 는 세 번째 몫
        assert_eq!(edge.native_value, Some(wei(3).to_native()));
        assert!(rows
            .iter()
            .filter(|r| r.tx_hash == "0xinner")
            .all(|r| r.native_value == Some(wei(3).to_native())));
        // 페이지 안쪽 트랜잭션은 조회하지 않는다
        assert_eq!(f.source.calls(), vec!["tx:0xedge:base".to_string()]);
    }

    #[tokio::test]
    async fn test_edge_group_without_logs_uses_visible_transfers() {
        let f = fixture(PurchaseStrategy::AnyNativeValue);

        let rows = f
            .normalizer
            .normalize_transfers(
                Chain::Polygon,
                vec![transfer("0xgone", 4, Some(wei(2 * POL)))],
                &HashMap::new(),
                PageEdges { has_previous: true, has_next: false },
            )
            .await;

        assert_eq!(rows[0].native_value, Some(2.0));
        assert_eq!(f.source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_price_failure_leaves_usd_empty() {
        let f = fixture(PurchaseStrategy::AnyNativeValue);
        f.prices.fail_all(true);

        let rows = f
            .normalizer
            .normalize_transfers(
                Chain::Polygon,
                vec![transfer("0x1", 0, Some(wei(POL)))],
                &HashMap::new(),
                PageEdges::default(),
            )
            .await;

        assert_eq!(rows[0].native_value, Some(1.0));
        assert_eq!(rows[0].usd_value, None);
    }

    #[tokio::test]
    async fn test_missing_value_resolved_from_known_then_lookup() {
        let f = fixture(PurchaseStrategy::AnyNativeValue);
        f.source.set_transaction("0xlookup", wei(2 * POL));
        let known = HashMap::from([("0xknown".to_string(), wei(4 * POL))]);

        let rows = f
            .normalizer
            .normalize_transfers(
                Chain::Polygon,
                vec![transfer("0xknown", 0, None), transfer("0xlookup", 0, None), transfer("0xlookup", 1, None)],
                &known,
                PageEdges::default(),
            )
            .await;

        let by_tx = |tx: &str| rows.iter().filter(|r| r.tx_hash == tx).collect::<Vec<_>>();
        assert_eq!(by_tx("0xknown")[0].native_value, Some(4.0));
        assert!(by_tx("0xlookup").iter().all(|r| r.native_value == Some(1.0)));
        // 트랜잭션 조회는 tx_hash 당 한 번
        assert_eq!(f.source.calls(), vec!["tx:0xlookup:polygon".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_value_is_not_purchase() {
        let f = fixture(PurchaseStrategy::AnyNativeValue);
        let rows = f
            .normalizer
            .normalize_transfers(
                Chain::Polygon,
                vec![transfer("0x2", 0, Some(Wei::zero()))],
                &HashMap::new(),
                PageEdges::default(),
            )
            .await;

        assert!(!rows[0].is_purchase);
        assert_eq!(rows[0].native_value, None);
        assert!(f.prices.calls().is_empty());
    }

    #[tokio::test]
    async fn test_seller_allowlist() {
        let sellers = HashSet::from(["0x0000000000000000000000000000000000000000".to_string()]);
        let f = fixture(PurchaseStrategy::SellerAllowlist { sellers });

        let mut resale = transfer("0x3", 1, Some(wei(POL)));
        resale.event.from_address = "0xsomeone".to_string();

        let rows = f
            .normalizer
            .normalize_transfers(
                Chain::Polygon,
                vec![transfer("0x3", 0, Some(wei(POL))), resale],
                &HashMap::new(),
                PageEdges::default(),
            )
            .await;

        assert!(rows[0].is_purchase);
        assert!(!rows[1].is_purchase);
    }

    #[tokio::test]
    async fn test_payouts_filtered_and_merged() {
        let f = fixture(PurchaseStrategy::AnyNativeValue);
        f.prices.set_historical("ethereum", ts().date_naive(), 3000.0);
        let wallet = PayoutWallet {
            id: Uuid::new_v4(),
            address: "0xpayout".to_string(),
            label: "payouts".to_string(),
            created_at: Utc::now(),
        };

        let event = |from: &str, to: &str, value: Wei| NativeEvent {
            tx_hash: "0xpay".to_string(),
            block_number: 7,
            timestamp: ts(),
            from_address: from.to_string(),
            to_address: to.to_string(),
            value,
        };

        let milli = POL / 1000;
        let rows = f
            .normalizer
            .normalize_payouts(
                Chain::Base,
                vec![
                    event("0xpayout", "0xr1", wei(milli)),
                    event("0xpayout", "0xr1", wei(milli)),
                    event("0xpayout", "0xr2", Wei::zero()),
                    event("0xstranger", "0xr3", wei(milli)),
                ],
                &[wallet.clone()],
            )
            .await;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payout_wallet_id, wallet.id);
        assert_eq!(rows[0].to_address, "0xr1");
        assert_eq!(rows[0].amount, 0.002);
        assert_eq!(rows[0].native_currency, NativeCurrency::Eth);
        assert_eq!(rows[0].usd_value, Some(0.002 * 3000.0));
    }
}

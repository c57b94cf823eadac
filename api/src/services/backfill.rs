//! Backfill Orchestrator
//!
//! 호출 한 번에 소스마다 정확히 한 페이지를 처리한다. 외부 스케줄러(또는 `scheduler`)가
//! `allCompleted` 가 될 때까지 반복 호출한다.
//!
//! ```text
//!   source ─▶ cursor 읽기 ─▶ (Done 이면 skip, API 호출 없음)
//!                └─▶ page fetch (일시적 실패 1회 재시도)
//!                      └─▶ adapter ─▶ normalizer ─▶ ledger ─▶ cursor 저장
//! ```
//!
//! 소스들은 `join_all` 로 동시에 처리하고, 한 소스의 실패는 해당 결과의 `error` 로만 남는다.
//! 실패한 소스의 커서는 그대로이므로 다음 호출이 같은 페이지를 다시 가져온다.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PayoutFeed;
use crate::db::{Contract, CursorRepository, PayoutWallet, ReferenceRepository};
use crate::services::adapter::NativeEvent;
use crate::services::chain_source::ChainDataSource;
use crate::services::cursor::{contract_source_key, payout_source_key, SyncState};
use crate::services::ledger::LedgerWriter;
use crate::services::normalizer::{Normalizer, PageEdges, ResolvedTransfer};
use crate::services::retry::{retry_transient, RetryPolicy};
use crate::types::Chain;

/// `POST /backfill` 요청 바디 (빈 바디 허용)
#[derive(Debug, Default, Deserialize)]
pub struct BackfillRequest {
    pub contract_address: Option<String>,
    pub backfill_payouts: Option<bool>,
}

/// 소스별 처리 결과
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceResult {
    pub name: String,
    pub chain: Chain,
    pub processed: u64,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub results: Vec<SourceResult>,
    #[serde(rename = "allCompleted")]
    pub all_completed: bool,
}

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("contract {0} is not tracked")]
    UnknownContract(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct BackfillOptions {
    pub payout_feed: PayoutFeed,
    pub retry: RetryPolicy,
}

pub struct BackfillService {
    reference: Arc<dyn ReferenceRepository>,
    cursors: Arc<dyn CursorRepository>,
    ledger: Arc<LedgerWriter>,
    normalizer: Arc<Normalizer>,
    source: Arc<dyn ChainDataSource>,
    options: BackfillOptions,
}

/// 페이지 하나를 처리한 결과
struct PageOutcome {
    processed: u64,
    completed: bool,
}

impl BackfillService {
    pub fn new(
        reference: Arc<dyn ReferenceRepository>,
        cursors: Arc<dyn CursorRepository>,
        ledger: Arc<LedgerWriter>,
        normalizer: Arc<Normalizer>,
        source: Arc<dyn ChainDataSource>,
        options: BackfillOptions,
    ) -> Self {
        Self { reference, cursors, ledger, normalizer, source, options }
    }

    pub async fn run(&self, request: &BackfillRequest) -> Result<BackfillReport, BackfillError> {
        let results = if request.backfill_payouts.unwrap_or(false) {
            self.run_payouts().await?
        } else {
            self.run_contracts(request.contract_address.as_deref()).await?
        };

        let all_completed = results.iter().all(|r| r.completed);
        tracing::info!(
            sources = results.len(),
            processed = results.iter().map(|r| r.processed).sum::<u64>(),
            all_completed,
            "backfill pass finished"
        );

        Ok(BackfillReport { results, all_completed })
    }

    /// 커서를 fresh 로 되돌린다. 커서가 있었으면 true
    pub async fn reset(&self, source_key: &str) -> Result<bool> {
        let existed = self.cursors.reset_cursor(source_key).await?;
        tracing::info!(source_key, existed, "sync cursor reset");
        Ok(existed)
    }

    async fn run_contracts(&self, only: Option<&str>) -> Result<Vec<SourceResult>, BackfillError> {
        let mut contracts = self.reference.list_contracts().await?;
        if let Some(address) = only {
            let address = address.trim().to_lowercase();
            contracts.retain(|c| c.address == address);
            if contracts.is_empty() {
                return Err(BackfillError::UnknownContract(address));
            }
        }

        let runs = contracts.iter().filter_map(|contract| {
            let Some(chain) = contract.chain() else {
                tracing::warn!(contract = %contract.address, chain = %contract.chain, "unsupported chain, skipping");
                return None;
            };
            Some(async move {
                let outcome = self.contract_page(contract, chain).await;
                into_result(contract.name.clone(), chain, outcome)
            })
        });

        Ok(join_all(runs).await)
    }

    async fn run_payouts(&self) -> Result<Vec<SourceResult>, BackfillError> {
        let wallets = self.reference.list_payout_wallets().await?;

        let runs = wallets.iter().flat_map(|wallet| {
            let wallets = &wallets;
            Chain::ALL.into_iter().map(move |chain| async move {
                let outcome = self.payout_page(wallet, chain, wallets).await;
                into_result(format!("{} payouts", wallet.label), chain, outcome)
            })
        });

        Ok(join_all(runs).await)
    }

    async fn contract_page(&self, contract: &Contract, chain: Chain) -> Result<PageOutcome> {
        let key = contract_source_key(&contract.id);
        let row = self.cursors.get_cursor(&key).await?;
        let state = SyncState::from_row(row.as_ref());
        if state.is_done() {
            return Ok(PageOutcome { processed: 0, completed: true });
        }

        let page = retry_transient(self.options.retry, "moralis.nft_transfers", || {
            self.source.nft_transfers(&contract.address, chain, state.request_cursor())
        })
        .await
        .with_context(|| format!("fetching transfers for {}", contract.address))?;

        let edges = PageEdges {
            has_previous: state.request_cursor().is_some(),
            has_next: page.cursor.is_some(),
        };
        let mut transfers = Vec::with_capacity(page.items.len());
        let mut last_block = None;
        for raw in page.items {
            match raw.into_event(None) {
                Ok(mut event) => {
                    last_block = Some(event.block_number);
                    event.contract_address.get_or_insert_with(|| contract.address.clone());
                    transfers.push(ResolvedTransfer { contract_id: contract.id, event });
                }
                Err(e) => tracing::warn!(source = %key, error = %e, "skipping malformed transfer"),
            }
        }

        let rows = self.normalizer.normalize_transfers(chain, transfers, &HashMap::new(), edges).await;
        let processed = self.ledger.write_transfers(&rows).await?;

        let next = state.advance(&key, page.cursor, last_block);
        self.cursors.save_cursor(&next).await?;

        tracing::info!(source = %key, contract = %contract.name, %chain, processed, completed = next.completed, "page ingested");
        Ok(PageOutcome { processed, completed: next.completed })
    }

    async fn payout_page(
        &self,
        wallet: &PayoutWallet,
        chain: Chain,
        wallets: &[PayoutWallet],
    ) -> Result<PageOutcome> {
        let key = payout_source_key(&wallet.address, chain);
        let row = self.cursors.get_cursor(&key).await?;
        let state = SyncState::from_row(row.as_ref());
        if state.is_done() {
            return Ok(PageOutcome { processed: 0, completed: true });
        }

        let (events, cursor) = match self.options.payout_feed {
            PayoutFeed::Native => {
                let page = retry_transient(self.options.retry, "moralis.native_transfers", || {
                    self.source.native_transfers(&wallet.address, chain, state.request_cursor())
                })
                .await?;
                let events: Vec<NativeEvent> = page
                    .items
                    .into_iter()
                    .filter_map(|raw| {
                        raw.into_event(None)
                            .map_err(|e| tracing::warn!(source = %key, error = %e, "skipping malformed native transfer"))
                            .ok()
                    })
                    .collect();
                (events, page.cursor)
            }
            PayoutFeed::History => {
                let page = retry_transient(self.options.retry, "moralis.wallet_history", || {
                    self.source.wallet_history(&wallet.address, chain, state.request_cursor())
                })
                .await?;
                let mut events = Vec::new();
                for entry in page.items {
                    match entry.into_events() {
                        Ok(legs) => events.extend(legs),
                        Err(e) => tracing::warn!(source = %key, error = %e, "skipping malformed history entry"),
                    }
                }
                (events, page.cursor)
            }
        };

        let last_block = events.last().map(|e| e.block_number);
        let rows = self.normalizer.normalize_payouts(chain, events, wallets).await;
        let processed = self.ledger.write_payouts(&rows).await?;

        let next = state.advance(&key, cursor, last_block);
        self.cursors.save_cursor(&next).await?;

        tracing::info!(source = %key, %chain, processed, completed = next.completed, "payout page ingested");
        Ok(PageOutcome { processed, completed: next.completed })
    }
}

fn into_result(name: String, chain: Chain, outcome: Result<PageOutcome>) -> SourceResult {
    match outcome {
        Ok(page) => SourceResult {
            name,
            chain,
            processed: page.processed,
            has_more: !page.completed,
            completed: page.completed,
            error: None,
        },
        Err(err) => {
            let message = format!("{:#}", err);
            tracing::error!(source = %name, %chain, error = %message, "backfill source failed");
            SourceResult {
                name,
                chain,
                processed: 0,
                has_more: true,
                completed: false,
                error: Some(message),
            }
        }
    }
}

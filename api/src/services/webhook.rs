//! Webhook Processor (Moralis Streams)
//!
//! ```text
//!   received ─▶ signature-verified ─▶ confirmed-filter ─▶ normalize + write ─▶ ack
//! ```
//!
//! 서명 검증은 JSON 파싱 전에 원본 바이트로 한다. 전달은 at-least-once 이므로
//! 같은 이벤트가 다시 와도 원장 upsert 키로 한 행만 남는다.
//! 레코드 단위 실패는 로그를 남기고 `skipped` 로 집계할 뿐 요청 전체를 실패시키지 않는다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::db::{NewNftTransfer, NewPayoutTransfer, ReferenceRepository};
use crate::services::adapter::{
    block_context, BlockContext, RawNativeTransfer, RawNftTransfer, RawTransaction,
};
use crate::services::ledger::LedgerWriter;
use crate::services::normalizer::{Normalizer, PageEdges, ResolvedTransfer};
use crate::services::signature::SignatureVerifier;
use crate::types::{Chain, Wei};

/// 스트림 이벤트 envelope
#[derive(Debug, Deserialize)]
pub struct StreamEnvelope {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(rename = "chainId", default)]
    pub chain_id: String,
    #[serde(default)]
    pub block: Option<StreamBlock>,
    #[serde(rename = "erc1155Transfers", default)]
    pub erc1155_transfers: Vec<RawNftTransfer>,
    #[serde(rename = "nativeTransfers", default)]
    pub native_transfers: Vec<RawNativeTransfer>,
    #[serde(default)]
    pub txs: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct StreamBlock {
    #[serde(default)]
    pub number: Value,
    #[serde(default)]
    pub timestamp: Value,
}

/// 처리 결과 (200 응답 바디)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookOutcome {
    Skipped { reason: String },
    Ok { transfers: u64, payouts: u64, skipped: u64 },
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing or invalid signature")]
    Unauthorized,

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct WebhookProcessor {
    verifier: SignatureVerifier,
    reference: Arc<dyn ReferenceRepository>,
    ledger: Arc<LedgerWriter>,
    normalizer: Arc<Normalizer>,
}

impl WebhookProcessor {
    pub fn new(
        verifier: SignatureVerifier,
        reference: Arc<dyn ReferenceRepository>,
        ledger: Arc<LedgerWriter>,
        normalizer: Arc<Normalizer>,
    ) -> Self {
        Self { verifier, reference, ledger, normalizer }
    }

    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookOutcome, WebhookError> {
        if !self.verifier.verify(body, signature) {
            tracing::warn!(has_signature = signature.is_some(), "webhook signature rejected");
            return Err(WebhookError::Unauthorized);
        }

        let envelope: StreamEnvelope =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

        if !envelope.confirmed {
            return Ok(WebhookOutcome::Skipped { reason: "unconfirmed".to_string() });
        }
        let Some(chain) = Chain::from_hex_id(&envelope.chain_id) else {
            tracing::debug!(chain_id = %envelope.chain_id, "ignoring event from unsupported chain");
            return Ok(WebhookOutcome::Skipped { reason: "unsupported chain".to_string() });
        };

        let block = match envelope.block.as_ref() {
            Some(b) => match block_context(&b.number, &b.timestamp) {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    tracing::warn!(error = %e, "webhook block header unreadable, relying on record fields");
                    None
                }
            },
            None => None,
        };

        let mut skipped = 0u64;
        let known_values = known_tx_values(envelope.txs);

        let transfers = self
            .ingest_transfers(chain, block.as_ref(), envelope.erc1155_transfers, &known_values, &mut skipped)
            .await?;
        let payouts = self
            .ingest_payouts(chain, block.as_ref(), envelope.native_transfers, &mut skipped)
            .await?;

        tracing::info!(%chain, transfers, payouts, skipped, "webhook processed");
        Ok(WebhookOutcome::Ok { transfers, payouts, skipped })
    }

    async fn ingest_transfers(
        &self,
        chain: Chain,
        block: Option<&BlockContext>,
        raws: Vec<RawNftTransfer>,
        known_values: &HashMap<String, Wei>,
        skipped: &mut u64,
    ) -> Result<u64> {
        if raws.is_empty() {
            return Ok(0);
        }

        let mut events = Vec::with_capacity(raws.len());
        for raw in raws {
            match raw.into_event(block) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed webhook transfer");
                    *skipped += 1;
                }
            }
        }

        // 참조된 컨트랙트 주소를 한 번의 쿼리로 해석
        let addresses: Vec<String> = events
            .iter()
            .filter_map(|e| e.contract_address.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let contracts: HashMap<String, uuid::Uuid> = if addresses.is_empty() {
            HashMap::new()
        } else {
            self.reference
                .find_contracts(chain, &addresses)
                .await?
                .into_iter()
                .map(|c| (c.address, c.id))
                .collect()
        };

        let mut resolved = Vec::with_capacity(events.len());
        for event in events {
            match event.contract_address.as_ref().and_then(|a| contracts.get(a)) {
                Some(contract_id) => resolved.push(ResolvedTransfer { contract_id: *contract_id, event }),
                None => {
                    tracing::debug!(tx_hash = %event.tx_hash, contract = ?event.contract_address, "transfer for untracked contract");
                    *skipped += 1;
                }
            }
        }

        // 스트림은 트랜잭션 로그를 블록 단위로 모아 보내므로 잘린 그룹이 없다
        let rows = self
            .normalizer
            .normalize_transfers(chain, resolved, known_values, PageEdges::default())
            .await;
        self.write_transfers_isolated(&rows, skipped).await
    }

    async fn ingest_payouts(
        &self,
        chain: Chain,
        block: Option<&BlockContext>,
        raws: Vec<RawNativeTransfer>,
        skipped: &mut u64,
    ) -> Result<u64> {
        if raws.is_empty() {
            return Ok(0);
        }

        let mut events = Vec::with_capacity(raws.len());
        for raw in raws {
            match raw.into_event(block) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed webhook native transfer");
                    *skipped += 1;
                }
            }
        }

        let wallets = self.reference.list_payout_wallets().await?;
        let rows: Vec<NewPayoutTransfer> = self.normalizer.normalize_payouts(chain, events, &wallets).await;
        self.write_payouts_isolated(&rows, skipped).await
    }

    /// 배치를 한 번에 쓰고, 실패하면 행 단위로 다시 써서 실패한 행만 건너뛴다
    async fn write_transfers_isolated(&self, rows: &[NewNftTransfer], skipped: &mut u64) -> Result<u64> {
        match self.ledger.write_transfers(rows).await {
            Ok(written) => Ok(written),
            Err(batch_err) => {
                tracing::warn!(error = %batch_err, rows = rows.len(), "batch write failed, retrying per record");
                let mut written = 0;
                for row in rows.chunks(1) {
                    match self.ledger.write_transfers(row).await {
                        Ok(n) => written += n,
                        Err(e) => {
                            tracing::error!(tx_hash = %row[0].tx_hash, log_index = row[0].log_index, error = %e, "failed to write webhook transfer");
                            *skipped += 1;
                        }
                    }
                }
                Ok(written)
            }
        }
    }

    async fn write_payouts_isolated(&self, rows: &[NewPayoutTransfer], skipped: &mut u64) -> Result<u64> {
        match self.ledger.write_payouts(rows).await {
            Ok(written) => Ok(written),
            Err(batch_err) => {
                tracing::warn!(error = %batch_err, rows = rows.len(), "batch write failed, retrying per record");
                let mut written = 0;
                for row in rows.chunks(1) {
                    match self.ledger.write_payouts(row).await {
                        Ok(n) => written += n,
                        Err(e) => {
                            tracing::error!(tx_hash = %row[0].tx_hash, to = %row[0].to_address, error = %e, "failed to write webhook payout");
                            *skipped += 1;
                        }
                    }
                }
                Ok(written)
            }
        }
    }
}

fn known_tx_values(txs: Vec<RawTransaction>) -> HashMap<String, Wei> {
    txs.into_iter()
        .filter_map(|tx| tx.into_detail().ok())
        .map(|detail| (detail.hash, detail.value))
        .collect()
}

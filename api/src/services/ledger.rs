//! Ledger Writer
//!
//! backfill 과 webhook 이 공유하는 원장 쓰기 경로. 중복 방지는 저장소의 유일 키
//! (`(tx_hash, log_index)`, `(tx_hash, to_address)`) upsert 에 전적으로 맡긴다.

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{LedgerRepository, NewNftTransfer, NewPayoutTransfer};

#[derive(Debug, Error)]
pub enum CompoundError {
    #[error("transfer not found")]
    NotFound,

    #[error("transfer does not belong to this wallet")]
    NotOwner,

    #[error("only purchases can be marked as compounded")]
    NotPurchase,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct LedgerWriter {
    repo: Arc<dyn LedgerRepository>,
}

impl LedgerWriter {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    /// 한 페이지(배치)의 NFT 전송을 한 트랜잭션으로 기록
    pub async fn write_transfers(&self, rows: &[NewNftTransfer]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = self.repo.upsert_transfers(rows).await?;
        tracing::debug!(rows = written, "transfers upserted");
        Ok(written)
    }

    pub async fn write_payouts(&self, rows: &[NewPayoutTransfer]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = self.repo.upsert_payouts(rows).await?;
        tracing::debug!(rows = written, "payouts upserted");
        Ok(written)
    }

    /// 구매 전송의 재투자 여부 변경. 수신 지갑 본인만 가능
    pub async fn mark_compounded(
        &self,
        transfer_id: Uuid,
        wallet: &str,
        is_compounded: bool,
    ) -> Result<(), CompoundError> {
        let transfer = self
            .repo
            .find_transfer(transfer_id)
            .await?
            .ok_or(CompoundError::NotFound)?;

        if transfer.to_address != wallet.to_lowercase() {
            return Err(CompoundError::NotOwner);
        }
        if !transfer.is_purchase {
            return Err(CompoundError::NotPurchase);
        }

        self.repo.set_compounded(transfer_id, is_compounded).await?;
        tracing::info!(%transfer_id, wallet, is_compounded, "compound flag updated");
        Ok(())
    }
}

//! Chain Data Source
//!
//! 인덱싱 프로바이더에 대한 페이지 단위 읽기 인터페이스.
//! 에러는 가공 없이 호출부로 전달하며, 재시도 정책은 호출부(backfill)가 갖는다.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::services::adapter::{
    RawHistoryEntry, RawNativeTransfer, RawNftTransfer, TxDetail,
};
use crate::types::Chain;

/// 한 페이지 결과. `cursor == None` 이면 마지막 페이지
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, cursor: None }
    }
}

#[async_trait]
pub trait ChainDataSource: Send + Sync {
    /// 컨트랙트의 ERC-1155 전송 목록
    async fn nft_transfers(
        &self,
        contract: &str,
        chain: Chain,
        cursor: Option<&str>,
    ) -> Result<Page<RawNftTransfer>, SourceError>;

    /// 지갑의 네이티브 토큰 트랜잭션
    async fn native_transfers(
        &self,
        wallet: &str,
        chain: Chain,
        cursor: Option<&str>,
    ) -> Result<Page<RawNativeTransfer>, SourceError>;

    /// 지갑 히스토리 (내부 전송 leg 포함)
    async fn wallet_history(
        &self,
        wallet: &str,
        chain: Chain,
        cursor: Option<&str>,
    ) -> Result<Page<RawHistoryEntry>, SourceError>;

    /// 단일 트랜잭션 상세 (금액, 타임스탬프)
    async fn transaction(&self, tx_hash: &str, chain: Chain) -> Result<TxDetail, SourceError>;
}

//! Moralis Web3 Data API client
//!
//! `ChainDataSource` 구현. 페이지 크기 100, 커서 기반 페이지네이션.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::error::SourceError;
use crate::services::adapter::{
    RawHistoryEntry, RawNativeTransfer, RawNftTransfer, RawPage, RawTransaction, TxDetail,
};
use crate::services::chain_source::{ChainDataSource, Page};
use crate::types::Chain;

const PAGE_LIMIT: &str = "100";

pub struct MoralisClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl MoralisClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, SourceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SourceError::NotConfigured("MORALIS_API_KEY".to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "moralis request");

        let response = self
            .http
            .get(&url)
            .header("X-API-Key", api_key)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status: status.as_u16(), body });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Malformed(e.to_string()))
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        chain: Chain,
        cursor: Option<&str>,
        extra: &[(&str, &str)],
    ) -> Result<Page<T>, SourceError> {
        let mut query = vec![("chain", chain.hex_id()), ("limit", PAGE_LIMIT)];
        query.extend_from_slice(extra);
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let raw: RawPage<T> = self.get(path, &query).await?;
        let cursor = raw.next_cursor();
        Ok(Page { items: raw.result, cursor })
    }
}

#[async_trait]
impl ChainDataSource for MoralisClient {
    async fn nft_transfers(
        &self,
        contract: &str,
        chain: Chain,
        cursor: Option<&str>,
    ) -> Result<Page<RawNftTransfer>, SourceError> {
        let path = format!("/nft/{}/transfers", contract);
        self.get_page(&path, chain, cursor, &[("format", "decimal")]).await
    }

    async fn native_transfers(
        &self,
        wallet: &str,
        chain: Chain,
        cursor: Option<&str>,
    ) -> Result<Page<RawNativeTransfer>, SourceError> {
        let path = format!("/{}", wallet);
        self.get_page(&path, chain, cursor, &[]).await
    }

    async fn wallet_history(
        &self,
        wallet: &str,
        chain: Chain,
        cursor: Option<&str>,
    ) -> Result<Page<RawHistoryEntry>, SourceError> {
        let path = format!("/wallets/{}/history", wallet);
        self.get_page(&path, chain, cursor, &[("include_internal_transactions", "true")])
            .await
    }

    async fn transaction(&self, tx_hash: &str, chain: Chain) -> Result<TxDetail, SourceError> {
        let path = format!("/transaction/{}", tx_hash);
        let raw: RawTransaction = self.get(&path, &[("chain", chain.hex_id())]).await?;
        let mut detail = raw.into_detail().map_err(|e| SourceError::Malformed(e.to_string()))?;
        if detail.hash.is_empty() {
            detail.hash = tx_hash.to_lowercase();
        }
        Ok(detail)
    }
}

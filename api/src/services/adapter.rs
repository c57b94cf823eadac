//! Provider payload adapter
//!
//! Moralis REST 응답(snake_case)과 Streams 웹훅(camelCase)은 같은 이벤트를 다른 모양으로
//! 보낸다. 필드명 차이, 숫자/문자열 혼용, ISO/unix 타임스탬프 차이는 모두 이 모듈에서
//! 흡수하고, 나머지 코드는 `TransferEvent` / `NativeEvent` 만 다룬다.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::types::Wei;

#[derive(Debug, Error, PartialEq)]
pub enum AdapterError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },
}

// ============ Raw provider shapes ============

/// ERC-1155 전송 (REST / webhook 공통)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNftTransfer {
    #[serde(default, alias = "transactionHash", alias = "hash")]
    pub transaction_hash: Option<String>,
    #[serde(default, alias = "logIndex", deserialize_with = "flexible_string")]
    pub log_index: Option<String>,
    #[serde(default, alias = "blockNumber", deserialize_with = "flexible_string")]
    pub block_number: Option<String>,
    #[serde(default, alias = "blockTimestamp")]
    pub block_timestamp: Option<Value>,
    #[serde(default, alias = "from")]
    pub from_address: Option<String>,
    #[serde(default, alias = "to")]
    pub to_address: Option<String>,
    #[serde(default, alias = "tokenId", deserialize_with = "flexible_string")]
    pub token_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub value: Option<String>,
    #[serde(default, alias = "contract", alias = "tokenAddress", alias = "token_address")]
    pub contract_address: Option<String>,
}

/// 네이티브 토큰 전송 / 지갑 트랜잭션
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNativeTransfer {
    #[serde(default, alias = "transactionHash", alias = "transaction_hash")]
    pub hash: Option<String>,
    #[serde(default, alias = "blockNumber", deserialize_with = "flexible_string")]
    pub block_number: Option<String>,
    #[serde(default, alias = "blockTimestamp")]
    pub block_timestamp: Option<Value>,
    #[serde(default, alias = "from")]
    pub from_address: Option<String>,
    #[serde(default, alias = "to")]
    pub to_address: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub value: Option<String>,
}

/// 지갑 히스토리 항목. 한 트랜잭션이 여러 수신자에게 내부 전송으로 분배될 수 있다
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHistoryEntry {
    #[serde(default, alias = "transactionHash")]
    pub hash: Option<String>,
    #[serde(default, alias = "blockNumber", deserialize_with = "flexible_string")]
    pub block_number: Option<String>,
    #[serde(default, alias = "blockTimestamp")]
    pub block_timestamp: Option<Value>,
    #[serde(default, alias = "from")]
    pub from_address: Option<String>,
    #[serde(default, alias = "to")]
    pub to_address: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub value: Option<String>,
    #[serde(default, alias = "nativeTransfers")]
    pub native_transfers: Vec<RawHistoryLeg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHistoryLeg {
    #[serde(default, alias = "from")]
    pub from_address: Option<String>,
    #[serde(default, alias = "to")]
    pub to_address: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub value: Option<String>,
}

/// 단일 트랜잭션 조회 결과 / 웹훅 `txs` 항목
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransaction {
    #[serde(default, alias = "transactionHash", alias = "transaction_hash")]
    pub hash: Option<String>,
    #[serde(default, deserialize_with = "flexible_string")]
    pub value: Option<String>,
    #[serde(default, alias = "blockTimestamp")]
    pub block_timestamp: Option<Value>,
    /// REST `/transaction/{hash}` 응답에만 있다
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

/// 트랜잭션 로그
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLog {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, alias = "logIndex", deserialize_with = "flexible_string")]
    pub log_index: Option<String>,
    #[serde(default)]
    pub topic0: Option<String>,
}

/// 페이지 응답 `{ cursor, result }`
#[derive(Debug, Deserialize)]
pub struct RawPage<T> {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
}

// ============ Canonical shapes ============

/// 블록 정보 (웹훅은 레코드가 아니라 envelope 에 블록 정보를 싣는다)
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    pub number: i64,
    pub timestamp: DateTime<Utc>,
}

/// 정규화된 NFT 전송 이벤트
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
    pub from_address: String,
    pub to_address: String,
    pub token_id: String,
    pub quantity: i64,
    pub contract_address: Option<String>,
    /// 이벤트 자체에 실린 트랜잭션 금액 (없으면 트랜잭션 조회로 보완)
    pub tx_value: Option<Wei>,
}

/// 정규화된 네이티브 전송 이벤트
#[derive(Debug, Clone, PartialEq)]
pub struct NativeEvent {
    pub tx_hash: String,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
    pub from_address: String,
    pub to_address: String,
    pub value: Wei,
}

/// ERC-1155 TransferSingle(address,address,address,uint256,uint256)
pub const TRANSFER_SINGLE_TOPIC: &str = "0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62";
/// ERC-1155 TransferBatch(address,address,address,uint256[],uint256[])
pub const TRANSFER_BATCH_TOPIC: &str = "0x4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e18c2f9ce12c0a1f39ba7";

/// 트랜잭션 로그 (주소, 토픽은 lowercase)
#[derive(Debug, Clone, PartialEq)]
pub struct TxLog {
    pub address: String,
    pub log_index: i64,
    pub topic0: String,
}

/// 트랜잭션 상세
#[derive(Debug, Clone, PartialEq)]
pub struct TxDetail {
    pub hash: String,
    pub value: Wei,
    pub timestamp: Option<DateTime<Utc>>,
    pub logs: Vec<TxLog>,
}

impl TxDetail {
    /// ERC-1155 전송 로그의 log_index 오름차순. `contract` 가 있으면 그 컨트랙트만
    pub fn transfer_log_indexes(&self, contract: Option<&str>) -> Vec<i64> {
        let mut indexes: Vec<i64> = self
            .logs
            .iter()
            .filter(|log| log.topic0 == TRANSFER_SINGLE_TOPIC || log.topic0 == TRANSFER_BATCH_TOPIC)
            .filter(|log| contract.map_or(true, |c| log.address == c))
            .map(|log| log.log_index)
            .collect();
        indexes.sort_unstable();
        indexes.dedup();
        indexes
    }
}

impl RawNftTransfer {
    pub fn into_event(self, block: Option<&BlockContext>) -> Result<TransferEvent, AdapterError> {
        let tx_hash = required_lower(self.transaction_hash, "transaction_hash")?;
        let log_index = parse_i64(self.log_index.as_deref(), "log_index")?
            .ok_or(AdapterError::MissingField("log_index"))?;
        let (block_number, timestamp) =
            block_fields(self.block_number.as_deref(), self.block_timestamp.as_ref(), block)?;

        let quantity = match self.amount.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw.parse::<i64>().map_err(|_| AdapterError::InvalidField {
                field: "amount",
                value: raw.to_string(),
            })?,
            None => 1,
        };

        Ok(TransferEvent {
            tx_hash,
            log_index,
            block_number,
            timestamp,
            from_address: required_lower(self.from_address, "from_address")?,
            to_address: required_lower(self.to_address, "to_address")?,
            token_id: self.token_id.unwrap_or_else(|| "0".to_string()),
            quantity,
            contract_address: self.contract_address.map(|a| a.trim().to_lowercase()),
            tx_value: parse_wei(self.value.as_deref(), "value")?,
        })
    }
}

impl RawNativeTransfer {
    pub fn into_event(self, block: Option<&BlockContext>) -> Result<NativeEvent, AdapterError> {
        let (block_number, timestamp) =
            block_fields(self.block_number.as_deref(), self.block_timestamp.as_ref(), block)?;
        Ok(NativeEvent {
            tx_hash: required_lower(self.hash, "hash")?,
            block_number,
            timestamp,
            from_address: required_lower(self.from_address, "from_address")?,
            to_address: required_lower(self.to_address, "to_address")?,
            value: parse_wei(self.value.as_deref(), "value")?.unwrap_or_default(),
        })
    }
}

impl RawHistoryEntry {
    /// 내부 전송 leg 마다 하나의 이벤트. leg 가 없으면 최상위 트랜잭션 자체
    pub fn into_events(self) -> Result<Vec<NativeEvent>, AdapterError> {
        let tx_hash = required_lower(self.hash, "hash")?;
        let (block_number, timestamp) =
            block_fields(self.block_number.as_deref(), self.block_timestamp.as_ref(), None)?;

        if self.native_transfers.is_empty() {
            return Ok(vec![NativeEvent {
                tx_hash,
                block_number,
                timestamp,
                from_address: required_lower(self.from_address, "from_address")?,
                to_address: required_lower(self.to_address, "to_address")?,
                value: parse_wei(self.value.as_deref(), "value")?.unwrap_or_default(),
            }]);
        }

        // leg 의 송신자는 분배 컨트랙트일 수 있으므로 원 트랜잭션 송신자를 기준으로 삼는다
        let payer = self.from_address.map(|a| a.trim().to_lowercase()).filter(|a| !a.is_empty());
        self.native_transfers
            .into_iter()
            .map(|leg| {
                let from_address = match &payer {
                    Some(p) => p.clone(),
                    None => required_lower(leg.from_address, "from_address")?,
                };
                Ok(NativeEvent {
                    tx_hash: tx_hash.clone(),
                    block_number,
                    timestamp,
                    from_address,
                    to_address: required_lower(leg.to_address, "to_address")?,
                    value: parse_wei(leg.value.as_deref(), "value")?.unwrap_or_default(),
                })
            })
            .collect()
    }
}

impl RawTransaction {
    pub fn into_detail(self) -> Result<TxDetail, AdapterError> {
        Ok(TxDetail {
            hash: required_lower(self.hash, "hash")?,
            value: parse_wei(self.value.as_deref(), "value")?.unwrap_or_default(),
            timestamp: match self.block_timestamp.as_ref() {
                Some(v) => Some(parse_timestamp(v)?),
                None => None,
            },
            // 필드가 빠진 로그는 건너뛴다
            logs: self.logs.into_iter().filter_map(RawLog::into_log).collect(),
        })
    }
}

impl RawLog {
    fn into_log(self) -> Option<TxLog> {
        let log_index = parse_i64(self.log_index.as_deref(), "log_index").ok().flatten()?;
        Some(TxLog {
            address: self.address?.trim().to_lowercase(),
            log_index,
            topic0: self.topic0?.trim().to_lowercase(),
        })
    }
}

impl<T> RawPage<T> {
    /// 빈 문자열 커서는 "다음 페이지 없음"
    pub fn next_cursor(&self) -> Option<String> {
        self.cursor.clone().filter(|c| !c.trim().is_empty())
    }
}

/// 웹훅 envelope 의 `block` 을 해석
pub fn block_context(number: &Value, timestamp: &Value) -> Result<BlockContext, AdapterError> {
    let number = match number {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => parse_i64(Some(s.as_str()), "block.number")?,
        _ => None,
    }
    .ok_or(AdapterError::MissingField("block.number"))?;

    Ok(BlockContext {
        number,
        timestamp: parse_timestamp(timestamp)?,
    })
}

/// unix 초(숫자 또는 숫자 문자열) 또는 RFC3339 문자열
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, AdapterError> {
    let invalid = || AdapterError::InvalidField {
        field: "timestamp",
        value: value.to_string(),
    };

    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(invalid),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                let secs: i64 = s.parse().map_err(|_| invalid())?;
                Utc.timestamp_opt(secs, 0).single().ok_or_else(invalid)
            } else {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| invalid())
            }
        }
        _ => Err(invalid()),
    }
}

fn block_fields(
    number: Option<&str>,
    timestamp: Option<&Value>,
    block: Option<&BlockContext>,
) -> Result<(i64, DateTime<Utc>), AdapterError> {
    let block_number = match parse_i64(number, "block_number")? {
        Some(n) => n,
        None => block.map(|b| b.number).ok_or(AdapterError::MissingField("block_number"))?,
    };
    let timestamp = match timestamp.filter(|v| !v.is_null()) {
        Some(v) => parse_timestamp(v)?,
        None => block
            .map(|b| b.timestamp)
            .ok_or(AdapterError::MissingField("block_timestamp"))?,
    };
    Ok((block_number, timestamp))
}

fn required_lower(value: Option<String>, field: &'static str) -> Result<String, AdapterError> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .ok_or(AdapterError::MissingField(field))
}

fn parse_i64(raw: Option<&str>, field: &'static str) -> Result<Option<i64>, AdapterError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => raw.parse::<i64>().ok(),
    };
    parsed.map(Some).ok_or_else(|| AdapterError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn parse_wei(raw: Option<&str>, field: &'static str) -> Result<Option<Wei>, AdapterError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => Wei::parse(raw).map(Some).ok_or_else(|| AdapterError::InvalidField {
            field,
            value: raw.to_string(),
        }),
    }
}

/// 문자열 또는 숫자를 문자열로 받는다
fn flexible_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rest_shape() {
        let raw: RawNftTransfer = serde_json::from_value(json!({
            "transaction_hash": "0xABC",
            "log_index": "7",
            "block_number": "123",
            "block_timestamp": "2024-05-01T12:00:00.000Z",
            "from_address": "0xFrom",
            "to_address": "0xTo",
            "token_id": "3",
            "amount": "2",
            "value": "20000000000000000000",
            "contract_type": "ERC1155"
        }))
        .unwrap();

        let event = raw.into_event(None).unwrap();
        assert_eq!(event.tx_hash, "0xabc");
        assert_eq!(event.log_index, 7);
        assert_eq!(event.block_number, 123);
        assert_eq!(event.quantity, 2);
        assert_eq!(event.from_address, "0xfrom");
        assert_eq!(event.tx_value, Wei::parse("20000000000000000000"));
        assert_eq!(event.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_webhook_shape_uses_block_context() {
        let raw: RawNftTransfer = serde_json::from_value(json!({
            "transactionHash": "0xdef",
            "logIndex": 4,
            "contract": "0xC0NTRACT",
            "from": "0xa",
            "to": "0xb",
            "tokenId": 9,
            "amount": "1"
        }))
        .unwrap();
        let block = block_context(&json!("555"), &json!("1714564800")).unwrap();

        let event = raw.into_event(Some(&block)).unwrap();
        assert_eq!(event.log_index, 4);
        assert_eq!(event.block_number, 555);
        assert_eq!(event.token_id, "9");
        assert_eq!(event.contract_address.as_deref(), Some("0xc0ntract"));
        assert_eq!(event.timestamp.timestamp(), 1_714_564_800);
        assert!(event.tx_value.is_none());
    }

    #[test]
    fn test_missing_hash_is_malformed() {
        let raw: RawNftTransfer = serde_json::from_value(json!({
            "log_index": "1", "from": "0xa", "to": "0xb"
        }))
        .unwrap();
        let block = block_context(&json!(1), &json!(1)).unwrap();
        assert_eq!(
            raw.into_event(Some(&block)).unwrap_err(),
            AdapterError::MissingField("transaction_hash")
        );
    }

    #[test]
    fn test_history_fan_out() {
        let raw: RawHistoryEntry = serde_json::from_value(json!({
            "hash": "0xpay",
            "block_number": "10",
            "block_timestamp": "2024-06-01T00:00:00Z",
            "from_address": "0xpayout",
            "to_address": "0xdisperse",
            "value": "0",
            "native_transfers": [
                { "from_address": "0xdisperse", "to_address": "0xr1", "value": "1000" },
                { "from_address": "0xdisperse", "to_address": "0xr2", "value": "2000" }
            ]
        }))
        .unwrap();

        let events = raw.into_events().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.tx_hash == "0xpay" && e.from_address == "0xpayout"));
        assert_eq!(events[1].to_address, "0xr2");
    }

    #[test]
    fn test_page_cursor() {
        let page: RawPage<RawNativeTransfer> =
            serde_json::from_value(json!({ "cursor": "", "result": [] })).unwrap();
        assert!(page.next_cursor().is_none());

        let page: RawPage<RawNativeTransfer> =
            serde_json::from_value(json!({ "cursor": "abc", "page_size": 100 })).unwrap();
        assert_eq!(page.next_cursor().as_deref(), Some("abc"));
    }
    #[test]
    fn test_transaction_transfer_logs_for_contract() {
        let raw: RawTransaction = serde_json::from_value(json!({
            "hash": "0xABC",
            "value": "20000000000000000000",
            "logs": [
                { "address": "0xPEARL", "log_index": "4", "topic0": TRANSFER_SINGLE_TOPIC },
                { "address": "0xpearl", "log_index": 1, "topic0": TRANSFER_SINGLE_TOPIC },
                { "address": "0xother", "log_index": "2", "topic0": TRANSFER_SINGLE_TOPIC },
                { "address": "0xpearl", "log_index": "3", "topic0": "0xddf252ad" },
                { "address": "0xpearl", "topic0": TRANSFER_BATCH_TOPIC }
            ]
        }))
        .unwrap();

        let detail = raw.into_detail().unwrap();
        assert_eq!(detail.logs.len(), 4);
        assert_eq!(detail.transfer_log_indexes(Some("0xpearl")), vec![1, 4]);
        assert_eq!(detail.transfer_log_indexes(None), vec![1, 2, 4]);

        // 웹훅 txs 항목에는 logs 가 없다
        let raw: RawTransaction = serde_json::from_value(json!({ "hash": "0xdef", "value": "1" })).unwrap();
        assert!(raw.into_detail().unwrap().logs.is_empty());
    }
}

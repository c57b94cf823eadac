//! Common Types Module
//!
//! 체인, 네이티브 통화, 컨트랙트 종류, 주소, wei 금액 등
//! 수집 파이프라인 전반에서 공유하는 타입 정의

use std::fmt;
use std::str::FromStr;

use ethers::types::{Address, U256};
use ethers::utils::format_units;
use serde::{Deserialize, Serialize};

/// 지원 체인
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Polygon,
    Base,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::Polygon, Chain::Base];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Polygon => "polygon",
            Chain::Base => "base",
        }
    }

    /// 인덱서(Moralis)가 사용하는 hex chain id
    pub fn hex_id(&self) -> &'static str {
        match self {
            Chain::Polygon => "0x89",
            Chain::Base => "0x2105",
        }
    }

    /// 웹훅 `chainId` 값으로부터 체인 결정. 미지원 체인은 None
    pub fn from_hex_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "0x89" => Some(Chain::Polygon),
            "0x2105" => Some(Chain::Base),
            _ => None,
        }
    }

    pub fn native_currency(&self) -> NativeCurrency {
        match self {
            Chain::Polygon => NativeCurrency::Pol,
            Chain::Base => NativeCurrency::Eth,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "polygon" => Ok(Chain::Polygon),
            "base" => Ok(Chain::Base),
            other => Chain::from_hex_id(other).ok_or_else(|| format!("Unsupported chain: {}", s)),
        }
    }
}

/// 네이티브 통화
///
/// Polygon 은 MATIC → POL 로 리브랜딩됨. 과거 데이터의 "MATIC" 심볼도 POL 로 읽는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeCurrency {
    #[serde(rename = "POL", alias = "MATIC")]
    Pol,
    #[serde(rename = "ETH")]
    Eth,
}

impl NativeCurrency {
    pub fn symbol(&self) -> &'static str {
        match self {
            NativeCurrency::Pol => "POL",
            NativeCurrency::Eth => "ETH",
        }
    }

    /// 가격 캐시에 남아 있을 수 있는 이전 심볼
    pub fn legacy_symbols(&self) -> &'static [&'static str] {
        match self {
            NativeCurrency::Pol => &["MATIC"],
            NativeCurrency::Eth => &[],
        }
    }
}

impl fmt::Display for NativeCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for NativeCurrency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "POL" | "MATIC" => Ok(NativeCurrency::Pol),
            "ETH" => Ok(NativeCurrency::Eth),
            _ => Err(format!("Unknown native currency: {}", s)),
        }
    }
}

/// 추적 컨트랙트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Pearl,
    Booster,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Pearl => "pearl",
            ContractType::Booster => "booster",
        }
    }
}

impl FromStr for ContractType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pearl" => Ok(ContractType::Pearl),
            "booster" => Ok(ContractType::Booster),
            _ => Err(format!("Unknown contract type: {}", s)),
        }
    }
}

/// Ethereum 주소 타입 (항상 lowercase 로 저장)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EthAddress(String);

impl EthAddress {
    pub fn new(addr: &str) -> Result<Self, String> {
        let addr = addr.trim().to_lowercase();
        if !addr.starts_with("0x") || addr.len() != 42 {
            return Err("Invalid Ethereum address format".to_string());
        }
        addr.parse::<Address>()
            .map_err(|_| "Invalid Ethereum address format".to_string())?;
        Ok(Self(addr))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 네이티브 토큰 금액 (18 decimals, wei 단위 정수)
///
/// 배치 구매 금액을 나눌 때 부동소수 오차 없이 합계가 보존되도록 정수로 계산한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Wei(pub U256);

impl Wei {
    pub const DECIMALS: u32 = 18;

    pub fn zero() -> Self {
        Self(U256::zero())
    }

    /// 프로바이더 값 파싱: 10진 문자열, `0x` hex 문자열 모두 허용
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            if hex.is_empty() {
                return Some(Self::zero());
            }
            return U256::from_str_radix(hex, 16).ok().map(Self);
        }
        U256::from_dec_str(raw).ok().map(Self)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// 사람이 읽는 단위(POL, ETH)로 변환
    pub fn to_native(&self) -> f64 {
        format_units(self.0, Self::DECIMALS)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    /// `n` 개로 균등 분할. 나머지는 앞쪽 항목에 1 wei 씩 배분해 합계를 보존한다.
    pub fn split_even(&self, n: usize) -> Vec<Wei> {
        if n == 0 {
            return Vec::new();
        }
        let divisor = U256::from(n);
        let base = self.0 / divisor;
        let remainder = (self.0 % divisor).as_usize();
        (0..n)
            .map(|i| {
                if i < remainder {
                    Wei(base + U256::one())
                } else {
                    Wei(base)
                }
            })
            .collect()
    }
}

impl std::ops::Add for Wei {
    type Output = Wei;

    fn add(self, rhs: Wei) -> Wei {
        Wei(self.0.saturating_add(rhs.0))
    }
}

impl std::iter::Sum for Wei {
    fn sum<I: Iterator<Item = Wei>>(iter: I) -> Wei {
        iter.fold(Wei::zero(), |acc, w| acc + w)
    }
}

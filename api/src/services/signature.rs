//! Webhook signature verification
//!
//! 서명 = hex(keyed_hash(body, secret)). 비교는 항상 상수 시간으로 수행한다.
//! HMAC 은 `Mac::verify_slice`, Keccak 은 `constant_time_eq` 로 디코딩한 바이트를 비교한다.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

type HmacSha256 = Hmac<Sha256>;

/// 서명 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// hex(HMAC-SHA256(secret, body))
    HmacSha256,
    /// hex(Keccak256(body ‖ secret))
    Keccak256,
}

impl FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hmac-sha256" | "hmac_sha256" | "hmac" => Ok(SignatureAlgorithm::HmacSha256),
            "keccak256" | "keccak" => Ok(SignatureAlgorithm::Keccak256),
            other => Err(format!(
                "WEBHOOK_SIGNATURE_ALGORITHM must be hmac-sha256 or keccak256, got {}",
                other
            )),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureAlgorithm::HmacSha256 => f.write_str("hmac-sha256"),
            SignatureAlgorithm::Keccak256 => f.write_str("keccak256"),
        }
    }
}

/// 서명 검증기
#[derive(Clone)]
pub struct SignatureVerifier {
    algorithm: SignatureAlgorithm,
    secret: Option<String>,
}

impl SignatureVerifier {
    pub fn new(algorithm: SignatureAlgorithm, secret: Option<String>) -> Self {
        Self { algorithm, secret }
    }

    /// 기대 서명 계산 (lowercase hex). 시크릿이 없으면 None
    pub fn sign(&self, body: &[u8]) -> Option<String> {
        let secret = self.secret.as_deref()?;
        let digest = match self.algorithm {
            SignatureAlgorithm::HmacSha256 => {
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
                mac.update(body);
                mac.finalize().into_bytes().to_vec()
            }
            SignatureAlgorithm::Keccak256 => {
                let mut hasher = Keccak256::new();
                hasher.update(body);
                hasher.update(secret.as_bytes());
                hasher.finalize().to_vec()
            }
        };
        Some(hex::encode(digest))
    }

    /// 시크릿 또는 서명이 없거나, hex 가 아니거나, 일치하지 않으면 false
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> bool {
        let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            return false;
        };
        let Some(secret) = self.secret.as_deref() else {
            return false;
        };
        let Ok(provided) = hex::decode(signature.strip_prefix("0x").unwrap_or(signature)) else {
            return false;
        };

        match self.algorithm {
            SignatureAlgorithm::HmacSha256 => {
                let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
                    return false;
                };
                mac.update(body);
                mac.verify_slice(&provided).is_ok()
            }
            SignatureAlgorithm::Keccak256 => {
                let mut hasher = Keccak256::new();
                hasher.update(body);
                hasher.update(secret.as_bytes());
                constant_time_eq(&hasher.finalize(), &provided)
            }
        }
    }
}

/// 길이가 같으면 모든 바이트를 끝까지 비교한다 (불일치 위치와 무관한 실행 시간)
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

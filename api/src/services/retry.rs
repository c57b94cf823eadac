//! Call-site retry for upstream requests
//!
//! 일시적 실패(네트워크, 5xx, 429)만 고정 간격으로 한 번 더 시도한다.
//! 그래도 실패하면 에러를 그대로 돌려주고, 다음 스케줄 호출이 같은 페이지를 다시 처리한다.

use std::future::Future;
use std::time::Duration;

use crate::error::SourceError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 최초 시도를 포함한 최대 시도 횟수
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn once(backoff: Duration) -> Self {
        Self { max_attempts: 2, backoff }
    }

    pub fn no_retry() -> Self {
        Self { max_attempts: 1, backoff: Duration::ZERO }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once(Duration::from_secs(1))
    }
}

/// 일시적 실패만 재시도
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(
                    operation = label,
                    attempt,
                    error = %err,
                    "transient upstream failure, retrying in {:?}",
                    policy.backoff
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_once() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(RetryPolicy::once(Duration::ZERO), "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(SourceError::Status { status: 502, body: "bad gateway".into() })
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_second_transient_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(RetryPolicy::once(Duration::ZERO), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Status { status: 503, body: String::new() })
        })
        .await;

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(RetryPolicy::once(Duration::ZERO), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Status { status: 400, body: "bad cursor".into() })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

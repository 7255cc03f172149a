//! 外部调用的超时 / 重试 / 取消
//!
//! 每次调用都受 `min(call_timeout, 剩余墙钟)` 约束，并与取消令牌竞争；只有瞬时错误在调用层重试，
//! 退避按线性递增。返回显式的 Result，由 Classifier 同步消费。

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::core::ControllerError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration, call_timeout: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            call_timeout,
        }
    }

    /// 不重试，仅施加超时
    pub fn no_retry(call_timeout: Duration) -> Self {
        Self::new(0, Duration::ZERO, call_timeout)
    }
}

/// 在截止时间与取消令牌约束下执行 op，瞬时错误按策略重试
///
/// - 取消：立即返回 `Cancelled`，进行中的 future 被丢弃
/// - 墙钟耗尽：返回 `BudgetExceeded`
/// - 单次超时：转为 `TransientExternal("timed out ...")`，可重试
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    deadline: Instant,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ControllerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControllerError>>,
{
    let mut retries = 0u32;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ControllerError::BudgetExceeded(format!(
                "wall clock exhausted before {} call",
                label
            )));
        }
        let limit = policy.call_timeout.min(remaining);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ControllerError::Cancelled),
            r = tokio::time::timeout(limit, op()) => match r {
                Ok(inner) => inner,
                Err(_) => Err(ControllerError::timeout(label, limit)),
            },
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                tracing::warn!(call = label, retry = retries, error = %e, "Transient failure, retrying");
                let pause = (policy.backoff * retries)
                    .min(deadline.saturating_duration_since(Instant::now()));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ControllerError::Cancelled),
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn deadline_in(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_transient_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_secs(1));
        let c = calls.clone();
        let out = call_with_retry(&policy, "llm", deadline_in(5), &CancellationToken::new(), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ControllerError::transient("llm", "502"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(out, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(1));
        let c = calls.clone();
        let out: Result<(), _> =
            call_with_retry(&policy, "llm", deadline_in(5), &CancellationToken::new(), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ControllerError::MalformedResponse {
                        role: "attacker".into(),
                        reason: "no json".into(),
                        raw: "?".into(),
                    })
                }
            })
            .await;
        assert!(matches!(out, Err(ControllerError::MalformedResponse { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_becomes_transient_after_retries() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(20));
        let out: Result<(), _> =
            call_with_retry(&policy, "sandbox", deadline_in(5), &CancellationToken::new(), || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        let err = out.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let policy = RetryPolicy::no_retry(Duration::from_secs(10));
        let started = Instant::now();
        let out: Result<(), _> = call_with_retry(&policy, "llm", deadline_in(30), &cancel, || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(out, Err(ControllerError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_expired_deadline_is_budget_error() {
        let policy = RetryPolicy::no_retry(Duration::from_secs(1));
        let out: Result<(), _> = call_with_retry(
            &policy,
            "llm",
            Instant::now(),
            &CancellationToken::new(),
            || async { Ok(()) },
        )
        .await;
        assert!(matches!(out, Err(ControllerError::BudgetExceeded(_))));
    }
}

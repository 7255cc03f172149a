//! 沙箱执行器
//!
//! 持有 Sandbox 与执行超时，run(action) 在超时与取消约束下调用沙箱；沙箱不可用按瞬时错误重试，
//! 策略拒绝转为退出码 126 的输出（由 Classifier 归为 Tool 类失败）。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::core::{call_with_retry, ControllerError, RetryPolicy};
use crate::sandbox::{Action, ExecRequest, RawOutput, Sandbox, SandboxError};

/// 沙箱自身超时之外，外层等待的宽限时间
const OUTER_GRACE: Duration = Duration::from_secs(5);

pub struct SandboxExecutor {
    sandbox: Arc<dyn Sandbox>,
    exec_timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl SandboxExecutor {
    pub fn new(sandbox: Arc<dyn Sandbox>, exec_timeout: Duration) -> Self {
        Self {
            sandbox,
            exec_timeout,
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    pub fn sandbox_name(&self) -> &str {
        self.sandbox.name()
    }

    /// 执行 Action；Err 仅为取消、预算耗尽或重试后仍失败的瞬时错误
    pub async fn run(
        &self,
        action: &Action,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<RawOutput, ControllerError> {
        let start = Instant::now();
        let remaining = deadline.saturating_duration_since(start);
        let exec_timeout = action
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.exec_timeout)
            .min(self.exec_timeout)
            .min(remaining);
        let request = ExecRequest {
            body: action.body.clone(),
            timeout: exec_timeout,
        };
        let policy = RetryPolicy::new(self.retries, self.backoff, exec_timeout + OUTER_GRACE);
        let sandbox = self.sandbox.clone();
        let source = format!("sandbox:{}", sandbox.name());

        let result = call_with_retry(&policy, &source, deadline, cancel, || {
            let sandbox = sandbox.clone();
            let request = request.clone();
            let source = source.clone();
            async move {
                match sandbox.execute(&request).await {
                    Ok(out) => Ok(out),
                    Err(SandboxError::Rejected(reason)) => Ok(RawOutput {
                        stderr: format!("rejected by sandbox policy: {}", reason),
                        exit_code: Some(126),
                        ..RawOutput::default()
                    }),
                    Err(e) => Err(ControllerError::transient(source, e.to_string())),
                }
            }
        })
        .await;

        let outcome = match &result {
            Ok(out) if out.timed_out => "timeout",
            Ok(out) if out.exit_code == Some(0) => "ok",
            Ok(_) => "non_zero_exit",
            Err(ControllerError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "sandbox_audit",
            "sandbox": self.sandbox.name(),
            "outcome": outcome,
            "exit_code": result.as_ref().ok().and_then(|o| o.exit_code),
            "duration_ms": start.elapsed().as_millis() as u64,
            "action_preview": action.preview(200),
        });
        tracing::info!(audit = %audit.to_string(), "sandbox");

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ShellSandbox;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySandbox {
        failures: AtomicU32,
    }

    #[async_trait]
    impl Sandbox for FlakySandbox {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _request: &ExecRequest) -> Result<RawOutput, SandboxError> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(SandboxError::Unavailable("daemon down".into()))
            } else {
                Ok(RawOutput {
                    stdout: "up".into(),
                    exit_code: Some(0),
                    ..RawOutput::default()
                })
            }
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_unavailable_retried() {
        let sandbox = Arc::new(FlakySandbox {
            failures: AtomicU32::new(1),
        });
        let exec = SandboxExecutor::new(sandbox, Duration::from_secs(5))
            .with_retries(2, Duration::from_millis(1));
        let out = exec
            .run(&Action::command("x"), deadline(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.stdout, "up");
    }

    #[tokio::test]
    async fn test_rejected_becomes_exit_126() {
        let exec = SandboxExecutor::new(
            Arc::new(ShellSandbox::new(vec!["mkfs".into()])),
            Duration::from_secs(5),
        );
        let out = exec
            .run(&Action::command("mkfs /dev/x"), deadline(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(126));
        assert!(out.stderr.contains("forbidden pattern"));
    }

    #[tokio::test]
    async fn test_action_timeout_capped_and_reported() {
        let exec = SandboxExecutor::new(
            Arc::new(ShellSandbox::new(vec![])),
            Duration::from_millis(100),
        );
        let mut action = Action::command("sleep 5");
        action.timeout_secs = Some(60);
        let out = exec
            .run(&action, deadline(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.timed_out);
    }
}

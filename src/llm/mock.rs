//! Mock 推理客户端（测试与离线演示用，无需 API）
//!
//! - `MockLlmClient`：按系统提示中的角色标记返回固定格式的输出，便于本地跑通状态机
//! - `ScriptedLlmClient`：按顺序弹出预置响应，用于驱动确定性的场景测试

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, MessageRole};

/// 离线 Mock：Advisor 给出固定建议，Attacker 回显一条无害命令，Reviewer 返回 PARTIAL
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let system = messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let reply = if system.contains("ROLE: ATTACKER") {
            r#"{"command": "echo mock probe", "description": "offline probe"}"#.to_string()
        } else if system.contains("ROLE: REVIEWER") {
            r#"{"audit_result": {"status": "PARTIAL", "confidence": 0.3}, "reasoning": "offline review"}"#
                .to_string()
        } else {
            "Enumerate the target surface before attempting exploitation.".to_string()
        };
        Ok(reply)
    }
}

/// 脚本化客户端：每次 complete 弹出下一条预置结果；耗尽后重复 fallback
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push(Ok(reply.into()));
        self
    }

    pub fn with_error(self, err: LlmError) -> Self {
        self.push(Err(err));
        self
    }

    /// 每次调用前先等待 delay（模拟慢响应 / 超时）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, item: Result<String, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_by_role_marker() {
        let client = MockLlmClient;
        let out = client
            .complete(&[Message::system("ROLE: ATTACKER"), Message::user("go")])
            .await
            .unwrap();
        assert!(out.contains("\"command\""));

        let out = client
            .complete(&[Message::system("ROLE: REVIEWER"), Message::user("go")])
            .await
            .unwrap();
        assert!(out.contains("PARTIAL"));
    }

    #[tokio::test]
    async fn test_scripted_pops_in_order_then_falls_back() {
        let client = ScriptedLlmClient::new("fallback")
            .with_reply("first")
            .with_error(LlmError::Timeout);
        assert_eq!(client.complete(&[]).await.unwrap(), "first");
        assert_eq!(client.complete(&[]).await, Err(LlmError::Timeout));
        assert_eq!(client.complete(&[]).await.unwrap(), "fallback");
        assert_eq!(client.calls(), 3);
    }
}

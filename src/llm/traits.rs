//! 推理服务客户端抽象
//!
//! 三个角色（Advisor / Attacker / Reviewer）共享同一 trait；后端可为 OpenAI 兼容端点、DeepSeek 或脚本化 Mock。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ControllerError;

/// 消息角色（与 Chat API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// 推理调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("api error: {0}")]
    Api(String),
    /// 服务返回了空内容
    #[error("empty completion")]
    Empty,
}

impl LlmError {
    /// 转为控制器错误；Empty 视为格式错误（不在调用层重试），其余均为瞬时错误
    pub fn into_controller_error(self, role: &str) -> ControllerError {
        match self {
            LlmError::Empty => ControllerError::MalformedResponse {
                role: role.to_string(),
                reason: "empty completion".to_string(),
                raw: String::new(),
            },
            LlmError::Timeout => ControllerError::transient(
                format!("llm:{}", role),
                "request timed out",
            ),
            other => ControllerError::transient(format!("llm:{}", role), other.to_string()),
        }
    }
}

/// 推理客户端：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_maps_to_malformed() {
        let err = LlmError::Empty.into_controller_error("advisor");
        assert!(matches!(err, ControllerError::MalformedResponse { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeout_maps_to_retryable_timeout() {
        let err = LlmError::Timeout.into_controller_error("attacker");
        assert!(err.is_retryable());
        assert!(err.is_timeout());
    }

    #[test]
    fn test_api_error_is_transient() {
        let err = LlmError::Api("502 bad gateway".into()).into_controller_error("reviewer");
        assert!(err.is_retryable());
        assert!(!err.is_timeout());
    }
}

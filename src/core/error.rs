//! 控制器错误分类
//!
//! 与 Outcome Classifier 配合：外部调用的瞬时错误、格式错误在控制器边界内被转换为 FailureRecord；
//! 只有预算耗尽与目标不可达会作为终止原因向上传递。

use std::time::Duration;

use thiserror::Error;

use crate::core::state::TerminalReason;

/// 控制器运行过程中可能出现的错误（外部协作方、预算、配置）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// 推理 / 检索 / 沙箱的超时或网络问题，按单次调用重试上限重试后归为 Tier 1
    #[error("Transient external error from {source_name}: {message}")]
    TransientExternal { source_name: String, message: String },

    /// 推理服务返回无法解析的内容；raw 保留原文供诊断
    #[error("Malformed response from {role}: {reason}")]
    MalformedResponse {
        role: String,
        reason: String,
        raw: String,
    },

    /// 不是硬错误，仅作为强制 SWITCH_METHOD 的控制信号
    #[error("Repetition loop detected: {0}")]
    RepetitionLoopDetected(String),

    /// 回合或墙钟预算耗尽，永不重试
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// 沙箱多次报告目标不可达
    #[error("Unrecoverable target: {0}")]
    UnrecoverableTarget(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl ControllerError {
    pub fn transient(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientExternal {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn timeout(source_name: impl Into<String>, after: Duration) -> Self {
        Self::TransientExternal {
            source_name: source_name.into(),
            message: format!("timed out after {}ms", after.as_millis()),
        }
    }

    /// 是否应在调用层重试（仅瞬时错误）
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExternal { .. })
    }

    /// 是否为超时（分类为 Network 类别）
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TransientExternal { message, .. } if message.contains("timed out"))
    }

    /// 是否终止整个 Attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::BudgetExceeded(_) | Self::UnrecoverableTarget(_) | Self::Cancelled
        )
    }

    /// 终止类错误对应的终止原因；取消按 UNRECOVERABLE 处理
    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        match self {
            Self::BudgetExceeded(_) => Some(TerminalReason::BudgetExhausted),
            Self::UnrecoverableTarget(_) | Self::Cancelled => Some(TerminalReason::Unrecoverable),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_reason_mapping() {
        assert_eq!(
            ControllerError::BudgetExceeded("turns".into()).terminal_reason(),
            Some(TerminalReason::BudgetExhausted)
        );
        assert_eq!(
            ControllerError::UnrecoverableTarget("refused".into()).terminal_reason(),
            Some(TerminalReason::Unrecoverable)
        );
        assert_eq!(ControllerError::Cancelled.terminal_reason(), Some(TerminalReason::Unrecoverable));
        assert_eq!(ControllerError::transient("llm", "reset").terminal_reason(), None);
    }

    #[test]
    fn test_timeout_is_transient_and_retryable() {
        let err = ControllerError::timeout("sandbox", Duration::from_millis(1500));
        assert!(err.is_retryable());
        assert!(err.is_timeout());
        assert!(!err.is_terminal());
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn test_malformed_not_retryable() {
        let err = ControllerError::MalformedResponse {
            role: "attacker".into(),
            reason: "no json".into(),
            raw: "???".into(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_budget_and_unreachable_are_terminal() {
        assert!(ControllerError::BudgetExceeded("turns".into()).is_terminal());
        assert!(ControllerError::UnrecoverableTarget("refused".into()).is_terminal());
        assert!(ControllerError::Cancelled.is_terminal());
        assert!(!ControllerError::RepetitionLoopDetected("curl".into()).is_terminal());
    }
}

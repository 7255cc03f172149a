//! 沙箱层：Attacker 产出的 Action 在这里执行
//!
//! - `Sandbox`：执行协作方接口（本机 shell / docker exec）
//! - `SandboxExecutor`：加超时、重试与 JSON 审计，输出一律转为 `Observation`
//! - 退出码与超时是给 Classifier 的数据，不是错误；只有沙箱调用本身没有返回才算错误

pub mod docker;
pub mod executor;
pub mod observation;
pub mod shell;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use docker::DockerSandbox;
pub use executor::SandboxExecutor;
pub use observation::{Observation, ObservationStatus};
pub use shell::ShellSandbox;

/// Action 主体：单条命令或脚本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionBody {
    Command { command: String },
    Script { language: String, source: String },
}

/// Attacker 请求的具体操作；恰好由一个 Turn 产生
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub body: ActionBody,
    #[serde(default)]
    pub description: String,
    /// Attacker 可以给出更短的执行超时；不会超过 sandbox.exec_timeout_secs
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Action {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            body: ActionBody::Command {
                command: command.into(),
            },
            description: String::new(),
            timeout_secs: None,
        }
    }

    pub fn script(language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            body: ActionBody::Script {
                language: language.into(),
                source: source.into(),
            },
            description: String::new(),
            timeout_secs: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 命令文本或脚本源码
    pub fn text(&self) -> &str {
        match &self.body {
            ActionBody::Command { command } => command,
            ActionBody::Script { source, .. } => source,
        }
    }

    /// 用于日志 / 摘要的单行预览
    pub fn preview(&self, max_chars: usize) -> String {
        let flat: String = self
            .text()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if flat.chars().count() > max_chars {
            format!("{}...", flat.chars().take(max_chars).collect::<String>())
        } else {
            flat
        }
    }
}

/// 沙箱原始返回（未截断）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// 沙箱自身的执行超时触发（进程已被杀掉）
    pub timed_out: bool,
}

impl RawOutput {
    /// stdout 与 stderr 合并后的全文
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// 单次执行请求
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub body: ActionBody,
    pub timeout: Duration,
}

/// 沙箱调用本身失败（与命令退出码无关）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    /// 沙箱不可用（docker 未运行、进程无法启动等），可重试
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
    /// 命令违反沙箱策略，不重试
    #[error("rejected by sandbox policy: {0}")]
    Rejected(String),
    #[error("sandbox io error: {0}")]
    Io(String),
}

/// 执行协作方：运行命令或脚本，返回原始输出
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: &ExecRequest) -> Result<RawOutput, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_json_shape() {
        let action = Action::command("curl -s http://t/").with_description("probe");
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["body"]["kind"], "command");
        assert_eq!(json["body"]["command"], "curl -s http://t/");

        let script = Action::script("python", "print(1)");
        assert_eq!(script.text(), "print(1)");
    }

    #[test]
    fn test_preview_flattens_and_truncates() {
        let action = Action::command("curl   -s\n http://target/very/long/path");
        assert_eq!(action.preview(100), "curl -s http://target/very/long/path");
        assert_eq!(action.preview(4), "curl...");
    }

    #[test]
    fn test_combined_output() {
        let raw = RawOutput {
            stdout: "out".into(),
            stderr: "err".into(),
            ..RawOutput::default()
        };
        assert_eq!(raw.combined(), "out\nerr");
    }
}

//! 本机 Shell 沙箱：命令走 sh -c，脚本走解释器 -c
//!
//! 禁止子串（rm -rf /、mkfs、fork bomb 等）直接拒绝；超时后进程随 kill_on_drop 被杀掉，
//! 以 `timed_out = true` 的 RawOutput 返回给 Classifier。

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::sandbox::{ActionBody, ExecRequest, RawOutput, Sandbox, SandboxError};

pub struct ShellSandbox {
    forbidden: Vec<String>,
}

impl ShellSandbox {
    pub fn new(forbidden_patterns: Vec<String>) -> Self {
        Self {
            forbidden: forbidden_patterns
                .into_iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    fn check(&self, text: &str) -> Result<(), SandboxError> {
        if text.trim().is_empty() {
            return Err(SandboxError::Rejected("empty command".to_string()));
        }
        let lower = text.to_lowercase();
        match self.forbidden.iter().find(|f| lower.contains(f.as_str())) {
            Some(pattern) => Err(SandboxError::Rejected(format!(
                "forbidden pattern: {}",
                pattern
            ))),
            None => Ok(()),
        }
    }
}

/// 脚本语言到解释器
pub(crate) fn interpreter(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "python" | "python3" | "py" => "python3",
        "bash" => "bash",
        "perl" => "perl",
        "ruby" => "ruby",
        "node" | "javascript" | "js" => "node",
        _ => "sh",
    }
}

#[async_trait]
impl Sandbox for ShellSandbox {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, request: &ExecRequest) -> Result<RawOutput, SandboxError> {
        let mut cmd = match &request.body {
            ActionBody::Command { command } => {
                self.check(command)?;
                let mut c = Command::new("sh");
                c.args(["-c", command.as_str()]);
                c
            }
            ActionBody::Script { language, source } => {
                self.check(source)?;
                let interp = interpreter(language);
                let flag = if interp == "node" { "-e" } else { "-c" };
                let mut c = Command::new(interp);
                c.args([flag, source.as_str()]);
                c
            }
        };
        run_process(&mut cmd, request.timeout).await
    }
}

/// 启动进程并在 timeout 内收集输出；启动失败为 Unavailable，超时返回 timed_out
pub(crate) async fn run_process(
    cmd: &mut Command,
    timeout: Duration,
) -> Result<RawOutput, SandboxError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let child = cmd
        .spawn()
        .map_err(|e| SandboxError::Unavailable(format!("spawn failed: {}", e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(RawOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            duration: start.elapsed(),
            timed_out: false,
        }),
        Ok(Err(e)) => Err(SandboxError::Io(e.to_string())),
        Err(_) => Ok(RawOutput {
            duration: start.elapsed(),
            timed_out: true,
            ..RawOutput::default()
        }),
    }
}

//! Docker 沙箱：`docker exec <container> sh -c ...` 在隔离容器内执行
//!
//! 容器需事先启动（通常是带渗透工具链的镜像）；docker 不可用时返回 Unavailable，由执行器按瞬时错误重试。

use async_trait::async_trait;
use tokio::process::Command;

use crate::sandbox::shell::{interpreter, run_process};
use crate::sandbox::{ActionBody, ExecRequest, RawOutput, Sandbox, SandboxError};

pub struct DockerSandbox {
    container: String,
    forbidden: Vec<String>,
}

impl DockerSandbox {
    pub fn new(container: impl Into<String>, forbidden_patterns: Vec<String>) -> Self {
        Self {
            container: container.into(),
            forbidden: forbidden_patterns
                .into_iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// 组装 docker exec 参数（不含 "docker" 本身）
    fn exec_args(&self, body: &ActionBody) -> Vec<String> {
        let mut args = vec!["exec".to_string(), self.container.clone()];
        match body {
            ActionBody::Command { command } => {
                args.extend(["sh".to_string(), "-c".to_string(), command.clone()]);
            }
            ActionBody::Script { language, source } => {
                let interp = interpreter(language);
                let flag = if interp == "node" { "-e" } else { "-c" };
                args.extend([interp.to_string(), flag.to_string(), source.clone()]);
            }
        }
        args
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &str {
        "docker"
    }

    async fn execute(&self, request: &ExecRequest) -> Result<RawOutput, SandboxError> {
        let text = match &request.body {
            ActionBody::Command { command } => command.as_str(),
            ActionBody::Script { source, .. } => source.as_str(),
        };
        let lower = text.to_lowercase();
        if let Some(pattern) = self.forbidden.iter().find(|f| lower.contains(f.as_str())) {
            return Err(SandboxError::Rejected(format!("forbidden pattern: {}", pattern)));
        }

        let mut cmd = Command::new("docker");
        cmd.args(self.exec_args(&request.body));
        let out = run_process(&mut cmd, request.timeout).await?;

        // docker 自身报错（容器不存在 / daemon 未运行）时退出码 125 / 126 且 stdout 为空
        let daemon_error = out.stdout.is_empty()
            && matches!(out.exit_code, Some(125))
            && (out.stderr.contains("No such container")
                || out.stderr.contains("Cannot connect to the Docker daemon")
                || out.stderr.contains("is not running"));
        if daemon_error {
            return Err(SandboxError::Unavailable(out.stderr.trim().to_string()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_args_for_command_and_script() {
        let sandbox = DockerSandbox::new("kali", vec![]);
        let args = sandbox.exec_args(&ActionBody::Command {
            command: "nmap -p 80 t".into(),
        });
        assert_eq!(args, vec!["exec", "kali", "sh", "-c", "nmap -p 80 t"]);

        let args = sandbox.exec_args(&ActionBody::Script {
            language: "python".into(),
            source: "print(1)".into(),
        });
        assert_eq!(args, vec!["exec", "kali", "python3", "-c", "print(1)"]);
    }

    #[tokio::test]
    async fn test_forbidden_pattern_rejected_before_docker() {
        let sandbox = DockerSandbox::new("kali", vec!["mkfs".into()]);
        let req = ExecRequest {
            body: ActionBody::Command {
                command: "mkfs.ext4 /dev/sda".into(),
            },
            timeout: std::time::Duration::from_secs(1),
        };
        assert!(matches!(
            sandbox.execute(&req).await,
            Err(SandboxError::Rejected(_))
        ));
    }
}

//! Shadow 命令行入口：加载配置 → 组装角色 / 沙箱 / 知识检索 → 运行一个 Attempt → 输出终止报告

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use shadow::config::{load_config, AppConfig};
use shadow::core::{Attempt, Controller, ShutdownManager, TerminalReason};
use shadow::knowledge::{HttpKnowledgeSearch, InMemoryKnowledge, KnowledgeSearch};
use shadow::llm::create_llm_from_config;
use shadow::observability::{self, TracingSink};
use shadow::roles::{prompts, LlmRoleAgent, Role, RoleAgent, RoleSet};
use shadow::sandbox::{DockerSandbox, Sandbox, SandboxExecutor, ShellSandbox};

/// 墙钟到期后留给控制器收尾的时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shadow - orchestration controller for security-testing attempts
#[derive(Parser, Debug)]
#[command(name = "shadow", version, about = "Advisor / Attacker / Reviewer attempt loop")]
struct Cli {
    /// Target URL or host
    #[arg(short, long)]
    target: String,

    /// What the attempt should achieve
    #[arg(short, long, visible_alias = "description")]
    objective: String,

    /// Optional challenge identifier, recorded in logs
    #[arg(long)]
    challenge_id: Option<String>,

    /// Override controller.max_turns
    #[arg(long)]
    max_turns: Option<usize>,

    /// Override controller.wall_clock_secs
    #[arg(long)]
    wall_clock_secs: Option<u64>,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the termination report (JSON) to this file
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    observability::init_with_level(&cli.log_level);

    let mut cfg = load_config(cli.config.clone()).context("failed to load config")?;
    if let Some(n) = cli.max_turns {
        cfg.controller.max_turns = n;
    }
    if let Some(secs) = cli.wall_clock_secs {
        cfg.controller.wall_clock_secs = secs;
    }
    cfg.validate().context("invalid config")?;

    let roles = build_roles(&cfg);
    let executor = build_executor(&cfg)?;
    let knowledge = build_knowledge(&cfg)?;

    let controller = Controller::from_config(&cfg, roles, executor, knowledge, Arc::new(TracingSink))
        .context("failed to build controller")?;

    let attempt = Attempt::new(
        cli.objective.as_str(),
        cli.target.as_str(),
        cfg.controller.max_turns,
        cfg.controller.wall_clock(),
    );
    tracing::info!(
        attempt = %attempt.id,
        challenge = cli.challenge_id.as_deref().unwrap_or("-"),
        sandbox = %cfg.sandbox.kind,
        "Starting attempt"
    );

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    shutdown.arm_deadline(attempt.wall_clock + SHUTDOWN_GRACE);

    let report = controller.run(attempt, shutdown.token()).await;

    let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    println!("{}", json);
    if let Some(path) = cli.report.as_ref().or(cfg.app.report_path.as_ref()) {
        std::fs::write(path, &json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    if report.reason != TerminalReason::Success {
        std::process::exit(1);
    }
    Ok(())
}

fn build_roles(cfg: &AppConfig) -> RoleSet {
    let prompts_dir = cfg.app.prompts_dir.as_deref();
    let agent = |role: Role, model: Option<&String>| -> Arc<dyn RoleAgent> {
        let llm = create_llm_from_config(&cfg.llm, model.map(String::as_str));
        Arc::new(LlmRoleAgent::new(role, llm, prompts::load(role, prompts_dir)))
    };
    RoleSet::new(
        agent(Role::Advisor, cfg.llm.advisor_model.as_ref()),
        agent(Role::Attacker, cfg.llm.attacker_model.as_ref()),
        agent(Role::Reviewer, cfg.llm.reviewer_model.as_ref()),
    )
}

fn build_executor(cfg: &AppConfig) -> Result<SandboxExecutor> {
    let forbidden = cfg.sandbox.forbidden_patterns.clone();
    let sandbox: Arc<dyn Sandbox> = match cfg.sandbox.kind.to_lowercase().as_str() {
        "shell" => Arc::new(ShellSandbox::new(forbidden)),
        "docker" => {
            let Some(container) = cfg.sandbox.container.as_deref() else {
                bail!("sandbox.kind = docker requires sandbox.container");
            };
            Arc::new(DockerSandbox::new(container, forbidden))
        }
        other => bail!("unknown sandbox kind: {}", other),
    };
    Ok(
        SandboxExecutor::new(sandbox, Duration::from_secs(cfg.sandbox.exec_timeout_secs))
            .with_retries(cfg.controller.call_retries, cfg.controller.retry_backoff()),
    )
}

fn build_knowledge(cfg: &AppConfig) -> Result<Arc<dyn KnowledgeSearch>> {
    if let Some(endpoint) = &cfg.knowledge.endpoint {
        let search = HttpKnowledgeSearch::new(endpoint.as_str(), cfg.knowledge.timeout_secs)
            .context("failed to create knowledge client")?;
        return Ok(Arc::new(search));
    }
    let store = InMemoryKnowledge::default();
    if let Some(path) = &cfg.knowledge.corpus_file {
        let n = store.load_corpus(path).context("failed to load knowledge corpus")?;
        tracing::info!("Loaded {} knowledge entries from {}", n, path.display());
    }
    Ok(Arc::new(store))
}

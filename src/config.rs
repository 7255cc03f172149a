//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SHADOW__*` 覆盖（双下划线表示嵌套，如 `SHADOW__CONTROLLER__MAX_TURNS=30`）。
//! 所有阈值都是配置项而非常量；`AppConfig::validate` 拒绝互相矛盾的组合。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::ControllerError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub controller: ControllerConfig,
    pub compression: CompressionConfig,
    pub repetition: RepetitionConfig,
    pub knowledge: KnowledgeConfig,
    pub sandbox: SandboxConfig,
    pub proof: ProofConfig,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 终止报告输出路径；未设置时只打印到 stdout
    pub report_path: Option<PathBuf>,
    /// 角色提示词目录（advisor.md / attacker.md / reviewer.md），缺省用内置提示词
    pub prompts_dir: Option<PathBuf>,
}

/// [llm] 段：后端选择与角色级模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub deepseek: LlmModelSection,
    pub openai: LlmModelSection,
    pub advisor_model: Option<String>,
    pub attacker_model: Option<String>,
    pub reviewer_model: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            deepseek: LlmModelSection::default(),
            openai: LlmModelSection::default(),
            advisor_model: None,
            attacker_model: None,
            reviewer_model: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelSection {
    pub model: Option<String>,
}

/// [controller] 段：预算、重试、信心与策略切换阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub max_turns: usize,
    pub wall_clock_secs: u64,
    /// 单次外部调用（推理 / 沙箱 / 检索）超时
    pub call_timeout_secs: u64,
    /// 单次调用层面的瞬时错误重试次数
    pub call_retries: u32,
    pub retry_backoff_ms: u64,
    pub baseline_confidence: u32,
    pub escalate_below: u32,
    pub method_switch_threshold: usize,
    pub category_switch_threshold: usize,
    /// Tier 1 连续出现多少次以内走 RETRY_SAME
    pub transient_retry_limit: usize,
    /// 同一假设下连续 Tier 2 达到该值升级为 Tier 3
    pub strategic_repeat_threshold: usize,
    /// 连续目标不可达达到该值判定 Tier 4
    pub unreachable_threshold: usize,
    /// 每隔多少个 Attacker 回合强制一次 Reviewer；0 表示仅在 ESCALATE_REVIEW 时评审
    pub review_interval: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            wall_clock_secs: 1800,
            call_timeout_secs: 120,
            call_retries: 2,
            retry_backoff_ms: 500,
            baseline_confidence: 50,
            escalate_below: 50,
            method_switch_threshold: 3,
            category_switch_threshold: 5,
            transient_retry_limit: 2,
            strategic_repeat_threshold: 3,
            unreachable_threshold: 3,
            review_interval: 1,
        }
    }
}

impl ControllerConfig {
    pub fn wall_clock(&self) -> Duration {
        Duration::from_secs(self.wall_clock_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.max_turns == 0 {
            return Err(ControllerError::Config("controller.max_turns must be > 0".into()));
        }
        if self.wall_clock_secs == 0 || self.call_timeout_secs == 0 {
            return Err(ControllerError::Config(
                "controller.wall_clock_secs and call_timeout_secs must be > 0".into(),
            ));
        }
        if self.baseline_confidence > 100 || self.escalate_below > 100 {
            return Err(ControllerError::Config(
                "confidence values must be within 0..=100".into(),
            ));
        }
        if self.method_switch_threshold == 0 {
            return Err(ControllerError::Config(
                "controller.method_switch_threshold must be > 0".into(),
            ));
        }
        if self.category_switch_threshold <= self.method_switch_threshold {
            return Err(ControllerError::Config(format!(
                "category_switch_threshold ({}) must be greater than method_switch_threshold ({})",
                self.category_switch_threshold, self.method_switch_threshold
            )));
        }
        if self.strategic_repeat_threshold < 2 || self.unreachable_threshold == 0 {
            return Err(ControllerError::Config(
                "strategic_repeat_threshold must be >= 2 and unreachable_threshold > 0".into(),
            ));
        }
        Ok(())
    }
}

/// [compression] 段：实时上下文预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub budget_tokens: usize,
    pub max_live_turns: usize,
    pub keep_recent: usize,
    pub max_observation_chars: usize,
    /// 额外的关键发现提取规则（TOML，`[[rule]] name kind pattern`）
    pub rules_file: Option<PathBuf>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            budget_tokens: 6000,
            max_live_turns: 10,
            keep_recent: 4,
            max_observation_chars: 8000,
            rules_file: None,
        }
    }
}

/// [repetition] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepetitionConfig {
    pub window: usize,
    pub threshold: usize,
    /// 去掉请求参数后的命令骨架相似度下限（归一化编辑距离）
    pub similarity: f64,
}

impl Default for RepetitionConfig {
    fn default() -> Self {
        Self {
            window: 10,
            threshold: 3,
            similarity: 0.95,
        }
    }
}

/// [knowledge] 段：外部语义检索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub failure_threshold: u32,
    pub top_k: usize,
    /// HTTP 检索服务地址；未设置时使用内存知识库
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    /// 内存知识库语料（纯文本，空行分隔条目）
    pub corpus_file: Option<PathBuf>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            top_k: 3,
            endpoint: None,
            timeout_secs: 15,
            corpus_file: None,
        }
    }
}

/// [sandbox] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// shell（本机 sh -c）或 docker（docker exec 到指定容器）
    pub kind: String,
    pub container: Option<String>,
    pub exec_timeout_secs: u64,
    /// 命令中出现即拒绝执行的子串
    pub forbidden_patterns: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            kind: "shell".to_string(),
            container: None,
            exec_timeout_secs: 60,
            forbidden_patterns: default_forbidden_patterns(),
        }
    }
}

fn default_forbidden_patterns() -> Vec<String> {
    vec![
        "rm -rf /".into(),
        "mkfs".into(),
        "dd if=".into(),
        ":(){".into(),
        "shutdown".into(),
        "reboot".into(),
    ]
}

/// [proof] 段：证明产物（flag）的格式与期望值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProofConfig {
    pub pattern: String,
    pub expected: Option<String>,
    pub expected_file: Option<PathBuf>,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            pattern: r"(?i)flag\{(?:[^{}]|\{[^{}]*\})+\}".to_string(),
            expected: None,
            expected_file: None,
        }
    }
}

impl ProofConfig {
    /// 期望值：`expected` 优先，其次 `expected_file` 的首行
    pub fn expected_value(&self) -> Option<String> {
        if let Some(v) = self.expected.as_ref().filter(|v| !v.trim().is_empty()) {
            return Some(v.trim().to_string());
        }
        let path = self.expected_file.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => text
                .lines()
                .next()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            Err(e) => {
                tracing::warn!("Failed to read proof.expected_file {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ControllerError> {
        self.controller.validate()?;
        if self.compression.budget_tokens == 0 || self.compression.max_live_turns == 0 {
            return Err(ControllerError::Config(
                "compression.budget_tokens and max_live_turns must be > 0".into(),
            ));
        }
        if self.repetition.window == 0 || self.repetition.threshold == 0 {
            return Err(ControllerError::Config(
                "repetition.window and repetition.threshold must be > 0".into(),
            ));
        }
        if self.repetition.threshold > self.repetition.window {
            return Err(ControllerError::Config(
                "repetition.threshold cannot exceed repetition.window".into(),
            ));
        }
        if self.knowledge.failure_threshold == 0 {
            return Err(ControllerError::Config(
                "knowledge.failure_threshold must be > 0".into(),
            ));
        }
        if regex::Regex::new(&self.proof.pattern).is_err() {
            return Err(ControllerError::Config(format!(
                "proof.pattern is not a valid regex: {}",
                self.proof.pattern
            )));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 SHADOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SHADOW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SHADOW")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.controller.method_switch_threshold, 3);
        assert_eq!(cfg.controller.category_switch_threshold, 5);
        assert_eq!(cfg.controller.escalate_below, 50);
        assert_eq!(cfg.repetition.window, 10);
    }

    #[test]
    fn test_category_threshold_must_exceed_method_threshold() {
        let mut cfg = AppConfig::default();
        cfg.controller.category_switch_threshold = 3;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ControllerError::Config(_)));
    }

    #[test]
    fn test_zero_budgets_rejected() {
        let mut cfg = AppConfig::default();
        cfg.controller.max_turns = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.repetition.window = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[controller]\nmax_turns = 7\n\n[proof]\nexpected = \"flag{{abc}}\""
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.controller.max_turns, 7);
        assert_eq!(cfg.controller.call_retries, 2);
        assert_eq!(cfg.proof.expected_value().as_deref(), Some("flag{abc}"));
    }

    #[test]
    fn test_expected_file_first_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  FLAG{{from_file}}  \nsecond line").unwrap();
        let proof = ProofConfig {
            expected_file: Some(file.path().to_path_buf()),
            ..ProofConfig::default()
        };
        assert_eq!(proof.expected_value().as_deref(), Some("FLAG{from_file}"));
    }
}

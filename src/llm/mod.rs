//! 推理层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage, DEEPSEEK_BASE_URL};
pub use traits::{LlmClient, LlmError, Message, MessageRole};

use crate::config::LlmSection;

/// 实际选用的后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    DeepSeek,
    OpenAi,
    Mock,
}

/// provider 与可用 key 共同决定后端；没有 key 时退回 Mock
fn select_backend(provider: &str, has_deepseek_key: bool, has_openai_key: bool) -> Backend {
    match provider {
        "mock" => Backend::Mock,
        "deepseek" if has_deepseek_key || has_openai_key => Backend::DeepSeek,
        "openai" if has_openai_key => Backend::OpenAi,
        _ if has_deepseek_key => Backend::DeepSeek,
        _ if has_openai_key => Backend::OpenAi,
        _ => Backend::Mock,
    }
}

/// 根据配置与环境变量创建客户端
///
/// `model_override` 为角色级模型（如 `llm.reviewer_model`），未设置时回落到后端默认模型。
pub fn create_llm_from_config(cfg: &LlmSection, model_override: Option<&str>) -> Arc<dyn LlmClient> {
    let backend = select_backend(
        &cfg.provider.to_lowercase(),
        std::env::var("DEEPSEEK_API_KEY").is_ok(),
        std::env::var("OPENAI_API_KEY").is_ok(),
    );
    let pick = |section: Option<&String>, default: &str| {
        model_override
            .map(String::from)
            .or_else(|| section.cloned())
            .unwrap_or_else(|| default.to_string())
    };

    match backend {
        Backend::DeepSeek => {
            let model = pick(cfg.deepseek.model.as_ref(), &cfg.model);
            tracing::info!("Using DeepSeek LLM ({})", model);
            Arc::new(OpenAiClient::deepseek(&model))
        }
        Backend::OpenAi => {
            let model = pick(cfg.openai.model.as_ref(), "gpt-4o-mini");
            tracing::info!("Using OpenAI-compatible LLM ({})", model);
            Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), &model, None))
        }
        Backend::Mock => {
            if cfg.provider != "mock" {
                tracing::warn!("No API key set for provider {}, using Mock LLM", cfg.provider);
            }
            Arc::new(MockLlmClient)
        }
    }
}

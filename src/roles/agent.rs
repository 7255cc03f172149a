//! 基于推理服务的角色实现
//!
//! 拼 system（角色提示词）+ user（渲染后的请求）调用 LlmClient，再按角色解析输出。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::ControllerError;
use crate::llm::{LlmClient, Message};
use crate::roles::{parse_action, parse_advice, parse_review, Role, RoleAgent, RoleOutput, RoleRequest};

pub struct LlmRoleAgent {
    role: Role,
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmRoleAgent {
    pub fn new(role: Role, llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            role,
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    /// 使用内置提示词
    pub fn with_builtin_prompt(role: Role, llm: Arc<dyn LlmClient>) -> Self {
        Self::new(role, llm, super::prompts::builtin(role))
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

#[async_trait]
impl RoleAgent for LlmRoleAgent {
    fn role(&self) -> Role {
        self.role
    }

    async fn invoke(&self, request: &RoleRequest) -> Result<RoleOutput, ControllerError> {
        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(request.render()),
        ];
        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| e.into_controller_error(self.role.as_str()))?;
        tracing::debug!(role = %self.role, raw = %raw, "role response");

        let output = match self.role {
            Role::Advisor => RoleOutput::Advice(parse_advice(&raw)?),
            Role::Attacker => RoleOutput::Action(parse_action(&raw)?),
            Role::Reviewer => RoleOutput::Review(parse_review(&raw)?),
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};

    fn request(role: Role) -> RoleRequest {
        RoleRequest {
            role,
            objective: "o".into(),
            target: "t".into(),
            context: String::new(),
            directive: None,
            knowledge: None,
        }
    }

    #[tokio::test]
    async fn test_attacker_parses_action() {
        let llm = Arc::new(ScriptedLlmClient::new("").with_reply(r#"{"command": "id"}"#));
        let agent = LlmRoleAgent::with_builtin_prompt(Role::Attacker, llm);
        match agent.invoke(&request(Role::Attacker)).await.unwrap() {
            RoleOutput::Action(a) => assert_eq!(a.text(), "id"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_llm_timeout_is_transient() {
        let llm = Arc::new(ScriptedLlmClient::new("").with_error(LlmError::Timeout));
        let agent = LlmRoleAgent::with_builtin_prompt(Role::Advisor, llm);
        let err = agent.invoke(&request(Role::Advisor)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_reviewer_malformed() {
        let llm = Arc::new(ScriptedLlmClient::new("looks fine to me"));
        let agent = LlmRoleAgent::with_builtin_prompt(Role::Reviewer, llm);
        let err = agent.invoke(&request(Role::Reviewer)).await.unwrap_err();
        assert!(matches!(err, ControllerError::MalformedResponse { .. }));
    }
}

//! 角色层：Advisor / Attacker / Reviewer
//!
//! 三个角色行为不同但调用方式一致：`RoleAgent::invoke(request) -> RoleOutput`。
//! 状态机按当前状态的角色标签分派，不做类型判断。

pub mod agent;
pub mod parse;
pub mod prompts;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ControllerError;
use crate::sandbox::Action;

pub use agent::LlmRoleAgent;
pub use parse::{extract_json_block, parse_action, parse_advice, parse_review};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Advisor,
    Attacker,
    Reviewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Advisor => "advisor",
            Role::Attacker => "attacker",
            Role::Reviewer => "reviewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Verified,
    Partial,
    Failed,
}

/// Reviewer 的评审结论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub status: ReviewStatus,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub reasoning: String,
    /// L1-L4 失败层级（可选）
    #[serde(default)]
    pub failure_level: Option<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ReviewVerdict {
    pub fn new(status: ReviewStatus) -> Self {
        Self {
            status,
            confidence: None,
            reasoning: String::new(),
            failure_level: None,
            recommendations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoleOutput {
    Advice(String),
    Action(Action),
    Review(ReviewVerdict),
}

impl RoleOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            RoleOutput::Advice(_) => "advice",
            RoleOutput::Action(_) => "action",
            RoleOutput::Review(_) => "review",
        }
    }
}

/// 一次角色调用的输入：目标、实时上下文、切换指令、可选知识段
#[derive(Debug, Clone)]
pub struct RoleRequest {
    pub role: Role,
    pub objective: String,
    pub target: String,
    /// 渲染后的实时上下文（关键发现 + 压缩段 + 实时回合）
    pub context: String,
    /// Router 的策略切换指令
    pub directive: Option<String>,
    /// 外部检索段（仅 Advisor）
    pub knowledge: Option<String>,
}

impl RoleRequest {
    /// 拼成发送给推理服务的用户消息
    pub fn render(&self) -> String {
        let mut out = format!(
            "## Objective\n{}\n\n## Target\n{}\n\n",
            self.objective.trim(),
            self.target.trim()
        );
        if let Some(directive) = &self.directive {
            out.push_str(&format!("## Directive\n{}\n\n", directive.trim()));
        }
        if let Some(knowledge) = &self.knowledge {
            out.push_str(knowledge.trim_end());
            out.push_str("\n\n");
        }
        if !self.context.trim().is_empty() {
            out.push_str(self.context.trim_end());
            out.push('\n');
        }
        out
    }
}

/// 角色统一接口
#[async_trait]
pub trait RoleAgent: Send + Sync {
    fn role(&self) -> Role;

    async fn invoke(&self, request: &RoleRequest) -> Result<RoleOutput, ControllerError>;
}

/// 三个角色的集合，按角色标签取用
#[derive(Clone)]
pub struct RoleSet {
    advisor: Arc<dyn RoleAgent>,
    attacker: Arc<dyn RoleAgent>,
    reviewer: Arc<dyn RoleAgent>,
}

impl RoleSet {
    pub fn new(
        advisor: Arc<dyn RoleAgent>,
        attacker: Arc<dyn RoleAgent>,
        reviewer: Arc<dyn RoleAgent>,
    ) -> Self {
        Self {
            advisor,
            attacker,
            reviewer,
        }
    }

    pub fn get(&self, role: Role) -> &Arc<dyn RoleAgent> {
        match role {
            Role::Advisor => &self.advisor,
            Role::Attacker => &self.attacker,
            Role::Reviewer => &self.reviewer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_render_sections() {
        let req = RoleRequest {
            role: Role::Advisor,
            objective: "get the flag".into(),
            target: "http://t/".into(),
            context: "## Live turns\n[Turn 0] ...".into(),
            directive: Some("Switch attack category".into()),
            knowledge: Some("## External knowledge (search results, unverified)\n1. x".into()),
        };
        let text = req.render();
        let obj = text.find("## Objective").unwrap();
        let dir = text.find("## Directive").unwrap();
        let know = text.find("## External knowledge").unwrap();
        let live = text.find("## Live turns").unwrap();
        assert!(obj < dir && dir < know && know < live);
    }

    #[test]
    fn test_role_display_and_serde() {
        assert_eq!(Role::Attacker.to_string(), "ATTACKER");
        assert_eq!(serde_json::to_string(&Role::Reviewer).unwrap(), "\"REVIEWER\"");
        assert_eq!(
            serde_json::to_string(&ReviewStatus::Verified).unwrap(),
            "\"VERIFIED\""
        );
    }
}

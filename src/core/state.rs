//! 状态定义：控制器状态、Router 转移、终止原因与终止报告

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::memory::KeyFinding;
use crate::roles::Role;
use crate::signals::ProofArtifact;

/// ADVISE → ACT → REVIEW → {ADVISE | ACT | TERMINATED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    Advise,
    Act,
    Review,
    Terminated(TerminalReason),
}

impl ControllerState {
    /// 该状态调用的角色；TERMINATED 没有角色
    pub fn role(self) -> Option<Role> {
        match self {
            ControllerState::Advise => Some(Role::Advisor),
            ControllerState::Act => Some(Role::Attacker),
            ControllerState::Review => Some(Role::Reviewer),
            ControllerState::Terminated(_) => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ControllerState::Terminated(_))
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Advise => f.write_str("ADVISE"),
            ControllerState::Act => f.write_str("ACT"),
            ControllerState::Review => f.write_str("REVIEW"),
            ControllerState::Terminated(reason) => write!(f, "TERMINATED({})", reason),
        }
    }
}

/// Router 输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transition {
    Continue,
    RetrySame,
    SwitchMethod,
    SwitchCategory,
    EscalateReview,
    TerminateSuccess,
    TerminateBudget,
    TerminateUnrecoverable,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Continue => "CONTINUE",
            Transition::RetrySame => "RETRY_SAME",
            Transition::SwitchMethod => "SWITCH_METHOD",
            Transition::SwitchCategory => "SWITCH_CATEGORY",
            Transition::EscalateReview => "ESCALATE_REVIEW",
            Transition::TerminateSuccess => "TERMINATE_SUCCESS",
            Transition::TerminateBudget => "TERMINATE_BUDGET",
            Transition::TerminateUnrecoverable => "TERMINATE_UNRECOVERABLE",
        }
    }

    pub fn terminal_reason(self) -> Option<TerminalReason> {
        match self {
            Transition::TerminateSuccess => Some(TerminalReason::Success),
            Transition::TerminateBudget => Some(TerminalReason::BudgetExhausted),
            Transition::TerminateUnrecoverable => Some(TerminalReason::Unrecoverable),
            _ => None,
        }
    }

    pub fn is_switch(self) -> bool {
        matches!(self, Transition::SwitchMethod | Transition::SwitchCategory)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalReason {
    Success,
    BudgetExhausted,
    Unrecoverable,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminalReason::Success => "SUCCESS",
            TerminalReason::BudgetExhausted => "BUDGET_EXHAUSTED",
            TerminalReason::Unrecoverable => "UNRECOVERABLE",
        })
    }
}

/// 一次策略切换（渲染进下一次 Advisor 上下文）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategySwitch {
    pub turn: usize,
    pub transition: Transition,
    /// 被放弃的方法或类别
    pub from: String,
    pub reason: String,
}

/// 一次完整运行的输入
#[derive(Debug, Clone)]
pub struct Attempt {
    pub id: Uuid,
    pub objective: String,
    pub target: String,
    pub max_turns: usize,
    pub wall_clock: Duration,
}

impl Attempt {
    pub fn new(
        objective: impl Into<String>,
        target: impl Into<String>,
        max_turns: usize,
        wall_clock: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            objective: objective.into(),
            target: target.into(),
            max_turns,
            wall_clock,
        }
    }
}

/// 终止报告：每个 Attempt 恰好一份
#[derive(Debug, Clone, Serialize)]
pub struct TerminationReport {
    pub attempt_id: String,
    pub objective: String,
    pub target: String,
    pub success: bool,
    pub proof: Option<ProofArtifact>,
    pub total_turns: usize,
    pub wall_clock_ms: u64,
    pub reason: TerminalReason,
    pub detail: String,
    pub final_confidence: u32,
    pub findings: Vec<KeyFinding>,
    pub switches: Vec<StrategySwitch>,
    pub segments: usize,
}

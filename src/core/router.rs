//! Router：有序规则表，自上而下第一条命中的规则决定转移
//!
//! 成功与预算检查排在所有战术规则之前；每条规则是纯函数，可单独测试。

use std::time::Duration;

use crate::config::ControllerConfig;
use crate::core::Transition;
use crate::signals::Tier;

/// 每个 Turn 结束后 Router 读取的信号
#[derive(Debug, Clone, Default)]
pub struct RouterSignals {
    pub confidence: u32,
    pub consecutive_failures: u32,
    /// 最近一次失败分层；成功 / 无法判定 / 无分类时为 None
    pub latest_tier: Option<Tier>,
    pub proof_verified: bool,
    pub repetition: bool,
    pub same_action_streak: usize,
    pub same_category_streak: usize,
    pub transient_streak: usize,
    pub turns_used: usize,
    pub turns_remaining: usize,
    pub elapsed: Duration,
    pub wall_clock: Duration,
}

#[derive(Debug, Clone)]
pub struct RouterThresholds {
    pub method_switch: usize,
    pub category_switch: usize,
    pub escalate_below: u32,
    pub transient_retry_limit: usize,
}

impl RouterThresholds {
    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self {
            method_switch: cfg.method_switch_threshold,
            category_switch: cfg.category_switch_threshold,
            escalate_below: cfg.escalate_below,
            transient_retry_limit: cfg.transient_retry_limit,
        }
    }
}

impl Default for RouterThresholds {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

type Rule = fn(&RouterSignals, &RouterThresholds) -> bool;

/// (转移, 规则名, 条件)，顺序即优先级
const RULES: &[(Transition, &str, Rule)] = &[
    (Transition::TerminateSuccess, "verified_proof", |s, _| {
        s.proof_verified
    }),
    (Transition::TerminateBudget, "budget_exhausted", |s, _| {
        s.turns_remaining == 0 || s.elapsed >= s.wall_clock
    }),
    (Transition::TerminateUnrecoverable, "terminal_tier", |s, _| {
        s.latest_tier == Some(Tier::Terminal)
    }),
    (Transition::RetrySame, "transient_failure", |s, t| {
        s.latest_tier == Some(Tier::Transient) && s.transient_streak <= t.transient_retry_limit
    }),
    (Transition::SwitchMethod, "method_exhausted", |s, t| {
        s.repetition || s.same_action_streak >= t.method_switch
    }),
    (Transition::SwitchCategory, "category_exhausted", |s, t| {
        s.same_category_streak >= t.category_switch
    }),
    (Transition::EscalateReview, "low_confidence", |s, t| {
        s.confidence < t.escalate_below
    }),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub transition: Transition,
    pub rule: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    thresholds: RouterThresholds,
}

impl Router {
    pub fn new(thresholds: RouterThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RouterThresholds {
        &self.thresholds
    }

    pub fn decide(&self, signals: &RouterSignals) -> Decision {
        RULES
            .iter()
            .find(|(_, _, rule)| rule(signals, &self.thresholds))
            .map(|(transition, rule, _)| Decision {
                transition: *transition,
                rule: *rule,
            })
            .unwrap_or(Decision {
                transition: Transition::Continue,
                rule: "default",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> RouterSignals {
        RouterSignals {
            confidence: 50,
            turns_remaining: 10,
            wall_clock: Duration::from_secs(60),
            ..RouterSignals::default()
        }
    }

    fn decide(s: &RouterSignals) -> Transition {
        Router::default().decide(s).transition
    }

    #[test]
    fn test_default_continue() {
        let d = Router::default().decide(&healthy());
        assert_eq!(d.transition, Transition::Continue);
        assert_eq!(d.rule, "default");
    }

    #[test]
    fn test_success_dominates_budget() {
        let s = RouterSignals {
            proof_verified: true,
            turns_remaining: 0,
            ..healthy()
        };
        assert_eq!(decide(&s), Transition::TerminateSuccess);
    }

    #[test]
    fn test_budget_dominates_tactical_rules() {
        let s = RouterSignals {
            turns_remaining: 0,
            latest_tier: Some(Tier::Transient),
            transient_streak: 1,
            repetition: true,
            confidence: 0,
            ..healthy()
        };
        assert_eq!(decide(&s), Transition::TerminateBudget);

        let s = RouterSignals {
            elapsed: Duration::from_secs(61),
            ..healthy()
        };
        assert_eq!(decide(&s), Transition::TerminateBudget);
    }

    #[test]
    fn test_terminal_tier() {
        let s = RouterSignals {
            latest_tier: Some(Tier::Terminal),
            ..healthy()
        };
        assert_eq!(decide(&s), Transition::TerminateUnrecoverable);
    }

    #[test]
    fn test_transient_retry_until_limit() {
        let mut s = RouterSignals {
            latest_tier: Some(Tier::Transient),
            transient_streak: 1,
            confidence: 0,
            ..healthy()
        };
        // 首次超时：重试而不是升级评审
        assert_eq!(decide(&s), Transition::RetrySame);
        s.transient_streak = 3;
        assert_eq!(decide(&s), Transition::EscalateReview);
    }

    #[test]
    fn test_repetition_forces_switch_method() {
        let s = RouterSignals {
            repetition: true,
            ..healthy()
        };
        assert_eq!(decide(&s), Transition::SwitchMethod);
    }

    #[test]
    fn test_method_then_category_thresholds() {
        let mut s = RouterSignals {
            latest_tier: Some(Tier::Tactical),
            same_category_streak: 3,
            same_action_streak: 1,
            confidence: 60,
            ..healthy()
        };
        assert_eq!(decide(&s), Transition::Continue);
        s.same_category_streak = 4;
        assert_eq!(decide(&s), Transition::Continue);
        s.same_category_streak = 5;
        assert_eq!(decide(&s), Transition::SwitchCategory);
        s.same_action_streak = 3;
        assert_eq!(decide(&s), Transition::SwitchMethod);
    }

    #[test]
    fn test_low_confidence_escalates() {
        let s = RouterSignals {
            confidence: 20,
            latest_tier: Some(Tier::Tactical),
            ..healthy()
        };
        assert_eq!(decide(&s), Transition::EscalateReview);
        let s = RouterSignals {
            confidence: 50,
            ..healthy()
        };
        assert_eq!(decide(&s), Transition::Continue);
    }

    #[test]
    fn test_thresholds_from_config() {
        let cfg = ControllerConfig {
            method_switch_threshold: 2,
            category_switch_threshold: 4,
            ..ControllerConfig::default()
        };
        let router = Router::new(RouterThresholds::from_config(&cfg));
        let s = RouterSignals {
            same_action_streak: 2,
            ..healthy()
        };
        assert_eq!(router.decide(&s).transition, Transition::SwitchMethod);
    }
}

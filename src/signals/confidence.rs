//! 信心追踪：[0, 100] 区间的单一分值与连续失败计数
//!
//! 只有控制器在每次分类之后调用 apply；其它组件只读。

use serde::Serialize;

use crate::signals::{Outcome, Tier};

pub const MAX_CONFIDENCE: u32 = 100;
const SUCCESS_BONUS: u32 = 20;
const TACTICAL_PENALTY: u32 = 30;
const AMBIGUOUS_PENALTY: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfidenceUpdate {
    pub before: u32,
    pub after: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct ConfidenceTracker {
    score: u32,
    consecutive_failures: u32,
}

impl ConfidenceTracker {
    pub fn new(baseline: u32) -> Self {
        Self {
            score: baseline.min(MAX_CONFIDENCE),
            consecutive_failures: 0,
        }
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// 成功 +20；Tier 2/3 −30；无法判定 −10；Tier 1/4 分值不变。
    /// 连续失败计数：Tier ≥ 1 递增，成功清零，无法判定不变。
    pub fn apply(&mut self, outcome: &Outcome) -> ConfidenceUpdate {
        let before = self.score;
        match outcome {
            Outcome::Success { .. } => {
                self.score = (self.score + SUCCESS_BONUS).min(MAX_CONFIDENCE);
                self.consecutive_failures = 0;
            }
            Outcome::Failure(record) => {
                if matches!(record.tier, Tier::Tactical | Tier::Strategic) {
                    self.score = self.score.saturating_sub(TACTICAL_PENALTY);
                }
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
            Outcome::Ambiguous => {
                self.score = self.score.saturating_sub(AMBIGUOUS_PENALTY);
            }
        }
        ConfidenceUpdate {
            before,
            after: self.score,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

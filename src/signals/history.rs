//! 失败历史：最近的分类结果，供 Classifier 与 Router 计算各类连续次数
//!
//! 成功与策略切换都会打断方法 / 类别连续；无法判定的结果不记录。
//! 推理调用失败（action_key 为 None）只参与瞬时连续计数。

use std::collections::VecDeque;

use crate::signals::{FailureCategory, FailureRecord, Outcome, Tier};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
enum Entry {
    Success,
    Failure(FailureRecord),
    Switch,
}

#[derive(Debug, Clone)]
pub struct FailureHistory {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl Default for FailureHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FailureHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, entry: Entry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success { .. } => self.push(Entry::Success),
            Outcome::Failure(record) => self.push(Entry::Failure(record.clone())),
            Outcome::Ambiguous => {}
        }
    }

    /// 策略切换：之后的方法 / 类别连续从零开始
    pub fn mark_switch(&mut self) {
        self.push(Entry::Switch);
    }

    /// 自最近一次成功或切换以来的动作失败（新 → 旧）
    fn action_failures(&self) -> impl Iterator<Item = &FailureRecord> {
        self.entries
            .iter()
            .rev()
            .take_while(|e| matches!(e, Entry::Failure(_)))
            .filter_map(|e| match e {
                Entry::Failure(r) if r.action_key.is_some() => Some(r),
                _ => None,
            })
    }

    pub fn last_failure(&self) -> Option<&FailureRecord> {
        match self.entries.back() {
            Some(Entry::Failure(r)) => Some(r),
            _ => None,
        }
    }

    /// 同一具体动作的连续失败次数
    pub fn same_action_streak(&self) -> usize {
        let mut iter = self.action_failures();
        let Some(first) = iter.next() else {
            return 0;
        };
        1 + iter.take_while(|r| r.action_key == first.action_key).count()
    }

    /// 同一失败类别的连续次数
    pub fn same_category_streak(&self) -> usize {
        let mut iter = self.action_failures();
        let Some(first) = iter.next() else {
            return 0;
        };
        1 + iter.take_while(|r| r.category == first.category).count()
    }

    /// 末尾连续 Tier 1 的次数（含推理调用失败）
    pub fn transient_streak(&self) -> usize {
        self.entries
            .iter()
            .rev()
            .take_while(|e| matches!(e, Entry::Failure(r) if r.tier == Tier::Transient))
            .count()
    }

    /// 同一假设下末尾连续的 Tier 2/3 次数（Tier 1 跳过，不打断也不计数）
    pub fn tactical_run(&self, hypothesis: u32) -> usize {
        self.action_failures()
            .filter(|r| r.tier != Tier::Transient)
            .take_while(|r| {
                r.hypothesis == hypothesis && matches!(r.tier, Tier::Tactical | Tier::Strategic)
            })
            .count()
    }

    /// 末尾连续的目标不可达记录数
    pub fn trailing_unreachable(&self) -> usize {
        self.action_failures().take_while(|r| r.unreachable).count()
    }

    /// 最近的失败类别（去重，新 → 旧，最多 n 个）
    pub fn recent_categories(&self, n: usize) -> Vec<FailureCategory> {
        let mut out = Vec::new();
        for entry in self.entries.iter().rev() {
            if let Entry::Failure(r) = entry {
                if r.action_key.is_some() && !out.contains(&r.category) {
                    out.push(r.category);
                    if out.len() == n {
                        break;
                    }
                }
            }
        }
        out
    }
}

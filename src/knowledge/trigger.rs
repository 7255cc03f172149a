//! Knowledge Trigger：连续失败越过阈值时触发一次检索（边沿触发）
//!
//! 同一失败连续段只触发一次；连续失败计数回到 0（出现成功）后恢复资格。
//! 结果只作为下一次 Advisor 请求的一个带标签的段落，不写入关键发现。

use crate::knowledge::Snippet;
use crate::signals::FailureCategory;

#[derive(Debug, Clone)]
pub struct KnowledgeTrigger {
    threshold: u32,
    top_k: usize,
    fired: bool,
}

impl KnowledgeTrigger {
    pub fn new(threshold: u32, top_k: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            top_k,
            fired: false,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// 每次分类后调用；返回 true 表示现在应当检索
    pub fn observe(&mut self, consecutive_failures: u32) -> bool {
        if consecutive_failures == 0 {
            self.fired = false;
            return false;
        }
        if consecutive_failures >= self.threshold && !self.fired {
            self.fired = true;
            return true;
        }
        false
    }

    /// 查询 = 目标描述 + 最近的失败类别
    pub fn build_query(objective: &str, recent: &[FailureCategory]) -> String {
        if recent.is_empty() {
            return objective.trim().to_string();
        }
        let categories: Vec<&str> = recent.iter().map(|c| c.as_str()).collect();
        format!(
            "{} (recent failures: {})",
            objective.trim(),
            categories.join(", ")
        )
    }

    /// 渲染为 Advisor 上下文中的独立段落
    pub fn render_section(snippets: &[Snippet]) -> Option<String> {
        if snippets.is_empty() {
            return None;
        }
        let mut out = String::from("## External knowledge (search results, unverified)\n");
        for (i, s) in snippets.iter().enumerate() {
            out.push_str(&format!("{}. [score {:.2}] {}\n", i + 1, s.score, s.text.trim()));
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_per_streak() {
        let mut t = KnowledgeTrigger::new(3, 3);
        let fired: Vec<bool> = [1, 2, 3, 4, 5, 6].iter().map(|n| t.observe(*n)).collect();
        assert_eq!(fired, vec![false, false, true, false, false, false]);
    }

    #[test]
    fn test_success_resets_eligibility() {
        let mut t = KnowledgeTrigger::new(3, 3);
        assert!(t.observe(3));
        assert!(!t.observe(0));
        assert!(!t.has_fired());
        assert!(!t.observe(2));
        assert!(t.observe(3));
    }

    #[test]
    fn test_ambiguous_keeps_streak() {
        // 无法判定不改变计数，同一数值重复出现也不会再次触发
        let mut t = KnowledgeTrigger::new(3, 3);
        assert!(t.observe(3));
        assert!(!t.observe(3));
    }

    #[test]
    fn test_query_and_section() {
        let q = KnowledgeTrigger::build_query(
            " find the admin flag ",
            &[FailureCategory::Logic, FailureCategory::Target],
        );
        assert_eq!(q, "find the admin flag (recent failures: logic, target)");
        let section = KnowledgeTrigger::render_section(&[Snippet {
            text: "try default creds".into(),
            score: 0.5,
        }])
        .unwrap();
        assert!(section.starts_with("## External knowledge"));
        assert!(section.contains("1. [score 0.50] try default creds"));
        assert!(KnowledgeTrigger::render_section(&[]).is_none());
    }
}

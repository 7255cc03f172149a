//! Context Compressor：保持实时上下文在预算之内
//!
//! 触发条件：实时大小超过 budget_tokens，或实时 Turn 数超过 max_live_turns。
//! 压缩前先对被折叠的 Observation 提取关键发现（按指纹幂等），关键发现永不删除。

use std::collections::BTreeMap;
use std::ops::Range;

use serde::Serialize;

use crate::config::CompressionConfig;
use crate::memory::findings::{FindingExtractor, FindingStore};
use crate::memory::token_budget::TokenEstimator;
use crate::memory::transcript::{Transcript, Turn, TurnOutput};

/// 一次压缩的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressionReport {
    pub compressed_turns: usize,
    pub new_segments: Vec<usize>,
    pub new_findings: usize,
    pub size_before: usize,
    pub size_after: usize,
    pub within_budget: bool,
}

#[derive(Debug, Clone)]
pub struct ContextCompressor {
    budget_tokens: usize,
    max_live_turns: usize,
    keep_recent: usize,
}

impl ContextCompressor {
    pub fn new(budget_tokens: usize, max_live_turns: usize, keep_recent: usize) -> Self {
        Self {
            budget_tokens,
            max_live_turns: max_live_turns.max(1),
            keep_recent: keep_recent.min(max_live_turns),
        }
    }

    pub fn from_config(cfg: &CompressionConfig) -> Self {
        Self::new(cfg.budget_tokens, cfg.max_live_turns, cfg.keep_recent)
    }

    pub fn budget_tokens(&self) -> usize {
        self.budget_tokens
    }

    /// 实时上下文：关键发现 + 压缩段 + 实时 Turn
    pub fn render_context(&self, transcript: &Transcript, findings: &FindingStore) -> String {
        let mut out = findings.render_section();
        let live = transcript.render_live();
        if !live.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("## History\n");
            out.push_str(&live);
        }
        out
    }

    pub fn live_size(&self, transcript: &Transcript, findings: &FindingStore) -> usize {
        TokenEstimator::estimate(&self.render_context(transcript, findings))
    }

    pub fn needs_compression(&self, transcript: &Transcript, findings: &FindingStore) -> bool {
        transcript.live_turn_count() > self.max_live_turns
            || self.live_size(transcript, findings) > self.budget_tokens
    }

    /// 不需要压缩时返回 None
    pub fn compress(
        &self,
        transcript: &mut Transcript,
        findings: &mut FindingStore,
        extractor: &FindingExtractor,
    ) -> Option<CompressionReport> {
        if !self.needs_compression(transcript, findings) {
            return None;
        }
        let size_before = self.live_size(transcript, findings);
        let mut report = CompressionReport {
            compressed_turns: 0,
            new_segments: Vec::new(),
            new_findings: 0,
            size_before,
            size_after: size_before,
            within_budget: false,
        };

        let older = transcript.live_turn_count().saturating_sub(self.keep_recent);
        if older > 0 {
            self.fold(transcript, findings, extractor, older, &mut report);
        }

        // 仍超预算：逐个折叠最早的 Turn（超大的单个 Turn 单独成段）
        while self.live_size(transcript, findings) > self.budget_tokens
            && transcript.live_turn_count() > 0
        {
            self.fold(transcript, findings, extractor, 1, &mut report);
        }

        let segments = transcript.live_segments();
        let over = self.live_size(transcript, findings) > self.budget_tokens;
        if segments.len() > 1 || (over && !segments.is_empty()) {
            let start = segments.iter().map(|s| s.turns.start).min().unwrap_or(0);
            let end = segments.iter().map(|s| s.turns.end).max().unwrap_or(0);
            let digest = self.digest(transcript, findings, start..end);
            if let Some(id) = transcript.merge_live_segments(digest.clone()) {
                report.new_segments.push(id);
            }

            let size = self.live_size(transcript, findings);
            if size > self.budget_tokens {
                let excess = size - self.budget_tokens;
                let target = TokenEstimator::estimate(&digest).saturating_sub(excess + 4);
                let trimmed = TokenEstimator::truncate(&digest, target);
                if let Some(id) = transcript.merge_live_segments(trimmed) {
                    report.new_segments.push(id);
                }
            }
        }

        // 段标题本身也放不下：段退出实时视图，只留关键发现
        let findings_only = TokenEstimator::estimate(&findings.render_section());
        if self.live_size(transcript, findings) > self.budget_tokens
            && findings_only <= self.budget_tokens
        {
            let retired = transcript.retire_live_segments();
            tracing::debug!(retired, "Compressed segments retired from live context");
        }

        report.size_after = self.live_size(transcript, findings);
        report.within_budget = report.size_after <= self.budget_tokens;
        if !report.within_budget {
            if findings_only > self.budget_tokens {
                tracing::warn!(
                    findings_tokens = findings_only,
                    budget = self.budget_tokens,
                    "Key findings alone exceed the context budget"
                );
            } else {
                tracing::warn!(
                    size = report.size_after,
                    budget = self.budget_tokens,
                    "Live context still over budget after compression"
                );
            }
        }
        tracing::info!(
            compressed_turns = report.compressed_turns,
            segments = report.new_segments.len(),
            new_findings = report.new_findings,
            size_before = report.size_before,
            size_after = report.size_after,
            "Context compressed"
        );
        Some(report)
    }

    fn fold(
        &self,
        transcript: &mut Transcript,
        findings: &mut FindingStore,
        extractor: &FindingExtractor,
        count: usize,
        report: &mut CompressionReport,
    ) {
        let indices: Vec<usize> = transcript
            .live_turns()
            .iter()
            .take(count)
            .map(|t| t.index)
            .collect();
        let (Some(&first), Some(&last)) = (indices.first(), indices.last()) else {
            return;
        };
        for &i in &indices {
            if let Some(obs) = transcript.turn(i).and_then(|t| t.observation()) {
                report.new_findings += findings.ingest(extractor, i, &obs.fingerprint, &obs.text());
            }
        }
        let digest = self.digest(transcript, findings, first..last + 1);
        if let Some(id) = transcript.fold_oldest_turns(indices.len(), digest) {
            report.compressed_turns += indices.len();
            report.new_segments.push(id);
        }
    }

    /// 规则摘要：动作类别计数、结果分布、评审结论、最后的建议、发现计数
    fn digest(&self, transcript: &Transcript, findings: &FindingStore, range: Range<usize>) -> String {
        let turns: Vec<&Turn> = transcript
            .turns()
            .iter()
            .filter(|t| range.contains(&t.index))
            .collect();

        let mut actions: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut outcomes: BTreeMap<String, usize> = BTreeMap::new();
        let mut reviews: BTreeMap<String, usize> = BTreeMap::new();
        let mut last_advice: Option<&str> = None;
        let mut call_failures = 0usize;

        for turn in &turns {
            match &turn.output {
                TurnOutput::Action { action, .. } => {
                    *actions.entry(categorize_command(action.text())).or_default() += 1;
                }
                TurnOutput::Review { verdict } => {
                    *reviews.entry(format!("{:?}", verdict.status).to_uppercase()).or_default() += 1;
                }
                TurnOutput::Advice { text } => last_advice = Some(text),
                TurnOutput::CallFailed { .. } => call_failures += 1,
            }
            if let Some(outcome) = &turn.outcome {
                *outcomes.entry(outcome.label()).or_default() += 1;
            }
        }

        let mut parts = Vec::new();
        let n_actions: usize = actions.values().sum();
        if n_actions > 0 {
            parts.push(format!("{} actions ({})", n_actions, counts(&actions)));
        }
        if !outcomes.is_empty() {
            parts.push(format!("outcomes: {}", counts(&outcomes)));
        }
        if !reviews.is_empty() {
            parts.push(format!("reviews: {}", counts(&reviews)));
        }
        if call_failures > 0 {
            parts.push(format!("{} failed role calls", call_failures));
        }
        if let Some(advice) = last_advice {
            let flat: String = advice.split_whitespace().collect::<Vec<_>>().join(" ");
            let preview: String = flat.chars().take(160).collect();
            parts.push(format!("last advice: {}", preview));
        }

        let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
        for f in findings.for_turns(range) {
            *kinds.entry(f.kind.to_string()).or_default() += 1;
        }
        if !kinds.is_empty() {
            parts.push(format!("findings: {}", counts(&kinds)));
        }

        if parts.is_empty() {
            format!("{} turns", turns.len())
        } else {
            parts.join("; ")
        }
    }
}

fn counts<K: std::fmt::Display>(map: &BTreeMap<K, usize>) -> String {
    map.iter()
        .map(|(k, n)| format!("{} x{}", k, n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 摘要中的命令类别
pub fn categorize_command(command: &str) -> &'static str {
    let lower = command.to_lowercase();
    let has = |tools: &[&str]| tools.iter().any(|t| lower.contains(t));
    if has(&["nmap", "masscan"]) {
        "port_scan"
    } else if has(&["sqlmap"]) {
        "sqli_test"
    } else if has(&["gobuster", "dirb", "dirsearch", "ffuf"]) {
        "dir_scan"
    } else if has(&["hydra", "brute"]) {
        "bruteforce"
    } else if has(&["nikto", "nuclei"]) {
        "vuln_scan"
    } else if has(&["curl", "wget", "requests.", "http://", "https://"]) {
        "http_request"
    } else {
        "command"
    }
}

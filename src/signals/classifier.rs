//! Outcome Classifier：把一次 Action 的 Observation 归入成功 / 失败分层
//!
//! 规则按顺序匹配，同样的 Observation 与历史总是得到同样的结果，且从不 panic：
//! 1. 执行层失败（超时 / 沙箱失败 / 空输出）→ Tier 1
//! 2. 已校验的证明产物 → Tier 0（带 proof）
//! 3. 目标不可达 → Target；连续达到阈值 → Tier 4，否则 Tier 1
//! 4. 失败标记或与上次同一动作的输出完全相同 → Tier 2；同一假设下连续 Tier 2 → Tier 3
//! 5. 进展标记 → Tier 0（无 proof）
//! 6. 其余 → 无法判定

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::ControllerError;
use crate::sandbox::{Observation, ObservationStatus};
use crate::signals::{FailureHistory, ProofArtifact, ProofVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Transient = 1,
    Tactical = 2,
    Strategic = 3,
    Terminal = 4,
}

impl Tier {
    pub fn level(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Network,
    Tool,
    Logic,
    Target,
    Unknown,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::Network => "network",
            FailureCategory::Tool => "tool",
            FailureCategory::Logic => "logic",
            FailureCategory::Target => "target",
            FailureCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub tier: Tier,
    pub category: FailureCategory,
    pub rationale: String,
    /// 归一化动作 key；推理调用失败时为 None
    pub action_key: Option<String>,
    /// 产生该动作时的 Advisor 轮次（假设编号）
    pub hypothesis: u32,
    /// 目标不可达标记
    pub unreachable: bool,
}

impl FailureRecord {
    pub fn new(
        tier: Tier,
        category: FailureCategory,
        rationale: impl Into<String>,
        action_key: impl Into<String>,
        hypothesis: u32,
    ) -> Self {
        Self {
            tier,
            category,
            rationale: rationale.into(),
            action_key: Some(action_key.into()),
            hypothesis,
            unreachable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Tier 0；proof 为已校验的证明产物，None 表示仅有进展
    Success { proof: Option<ProofArtifact> },
    Failure(FailureRecord),
    Ambiguous,
}

impl Outcome {
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Outcome::Failure(r) => Some(r.tier),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        match self {
            Outcome::Failure(r) => Some(r),
            _ => None,
        }
    }

    pub fn proof(&self) -> Option<&ProofArtifact> {
        match self {
            Outcome::Success { proof } => proof.as_ref(),
            _ => None,
        }
    }

    /// 摘要用短标签
    pub fn label(&self) -> String {
        match self {
            Outcome::Success { proof: Some(_) } => "success(proof)".to_string(),
            Outcome::Success { proof: None } => "progress".to_string(),
            Outcome::Failure(r) => format!("tier{}:{}", r.tier.level(), r.category.as_str()),
            Outcome::Ambiguous => "ambiguous".to_string(),
        }
    }
}

/// 分类输入
pub struct ClassifyInput<'a> {
    pub action_key: &'a str,
    pub hypothesis: u32,
    pub turn: usize,
    pub observation: &'a Observation,
    /// 完整（未截断）输出
    pub full_output: &'a str,
    /// 同一动作上一次观察的指纹
    pub previous_fingerprint: Option<&'a str>,
}

struct Markers {
    unreachable: Regex,
    not_found_cmd: Regex,
    http_status: Regex,
    failure: Regex,
    success: Regex,
}

fn markers() -> Option<&'static Markers> {
    static M: OnceLock<Option<Markers>> = OnceLock::new();
    M.get_or_init(|| {
        Some(Markers {
            unreachable: Regex::new(
                r"(?i)connection refused|could not resolve host|no route to host|name or service not known|connection timed out|host is unreachable|network is unreachable",
            )
            .ok()?,
            not_found_cmd: Regex::new(r"(?i)command not found|not recognized as|usage:|invalid option|unrecognized option").ok()?,
            http_status: Regex::new(r"HTTP/\d(?:\.\d)?\s+(\d{3})").ok()?,
            failure: Regex::new(
                r"(?i)\berror\b|access denied|permission denied|\bdenied\b|forbidden|not found|unauthorized|invalid (?:credentials|password|username)|login failed",
            )
            .ok()?,
            success: Regex::new(
                r"(?i)\bsuccess(?:ful(?:ly)?)?\b|access granted|logged in|welcome|\b200 OK\b|\bfound\b",
            )
            .ok()?,
        })
    })
    .as_ref()
}

#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    proof: ProofVerifier,
    strategic_repeat_threshold: usize,
    unreachable_threshold: usize,
}

impl OutcomeClassifier {
    pub fn new(
        proof: ProofVerifier,
        strategic_repeat_threshold: usize,
        unreachable_threshold: usize,
    ) -> Self {
        Self {
            proof,
            strategic_repeat_threshold,
            unreachable_threshold,
        }
    }

    pub fn proof_verifier(&self) -> &ProofVerifier {
        &self.proof
    }

    pub fn classify(&self, input: &ClassifyInput<'_>, history: &FailureHistory) -> Outcome {
        let obs = input.observation;
        let fail = |tier: Tier, category: FailureCategory, rationale: String| {
            Outcome::Failure(FailureRecord {
                tier,
                category,
                rationale,
                action_key: Some(input.action_key.to_string()),
                hypothesis: input.hypothesis,
                unreachable: false,
            })
        };

        match obs.status {
            ObservationStatus::TimedOut => {
                return fail(
                    Tier::Transient,
                    FailureCategory::Network,
                    obs.detail.clone().unwrap_or_else(|| "execution timed out".into()),
                )
            }
            ObservationStatus::SandboxFailed => {
                return fail(
                    Tier::Transient,
                    FailureCategory::Tool,
                    obs.detail.clone().unwrap_or_else(|| "sandbox failure".into()),
                )
            }
            ObservationStatus::Malformed => {
                return fail(
                    Tier::Transient,
                    FailureCategory::Unknown,
                    "empty output without exit status".into(),
                )
            }
            ObservationStatus::Completed => {}
        }

        if let Some(proof) = self.proof.find_verified(input.full_output, input.turn) {
            return Outcome::Success { proof: Some(proof) };
        }

        let Some(m) = markers() else {
            return Outcome::Ambiguous;
        };
        let text = input.full_output;

        if let Some(hit) = m.unreachable.find(text) {
            let prior = self.unreachable_threshold.saturating_sub(1);
            let terminal = history.trailing_unreachable() >= prior;
            let tier = if terminal { Tier::Terminal } else { Tier::Transient };
            return Outcome::Failure(FailureRecord {
                tier,
                category: FailureCategory::Target,
                rationale: format!("target unreachable: {}", hit.as_str()),
                action_key: Some(input.action_key.to_string()),
                hypothesis: input.hypothesis,
                unreachable: true,
            });
        }

        let status = m
            .http_status
            .captures_iter(text)
            .filter_map(|c| c[1].parse::<u16>().ok())
            .last();
        let non_zero = matches!(obs.exit_code, Some(code) if code != 0);
        let unchanged = input
            .previous_fingerprint
            .is_some_and(|fp| fp == obs.fingerprint);

        let tactical = if let Some(hit) = m.not_found_cmd.find(text) {
            Some((FailureCategory::Tool, format!("tool error: {}", hit.as_str())))
        } else if let Some(code) = status.filter(|c| *c >= 500) {
            Some((FailureCategory::Target, format!("server error HTTP {}", code)))
        } else if let Some(code) = status.filter(|c| *c >= 400) {
            Some((FailureCategory::Logic, format!("request rejected HTTP {}", code)))
        } else if let Some(hit) = m.failure.find(text) {
            Some((FailureCategory::Logic, format!("failure marker: {}", hit.as_str())))
        } else if non_zero {
            Some((
                FailureCategory::Tool,
                format!("non-zero exit {}", obs.exit_code.unwrap_or_default()),
            ))
        } else if unchanged {
            Some((FailureCategory::Logic, "output unchanged from previous run".to_string()))
        } else {
            None
        };

        if let Some((category, rationale)) = tactical {
            let run = history.tactical_run(input.hypothesis) + 1;
            return if run >= self.strategic_repeat_threshold {
                fail(
                    Tier::Strategic,
                    category,
                    format!("{} ({} consecutive under same hypothesis)", rationale, run),
                )
            } else {
                fail(Tier::Tactical, category, rationale)
            };
        }

        if m.success.is_match(text) {
            return Outcome::Success { proof: None };
        }
        Outcome::Ambiguous
    }

    /// 推理调用失败（超时 / 格式错误 / 限流）统一为 Tier 1
    pub fn classify_call_failure(&self, role: &str, err: &ControllerError, hypothesis: u32) -> Outcome {
        let category = match err {
            ControllerError::MalformedResponse { .. } => FailureCategory::Unknown,
            _ => FailureCategory::Network,
        };
        Outcome::Failure(FailureRecord {
            tier: Tier::Transient,
            category,
            rationale: format!("{} call failed: {}", role, err),
            action_key: None,
            hypothesis,
            unreachable: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::RawOutput;

    fn classifier() -> OutcomeClassifier {
        let proof = ProofVerifier::new(r"(?i)flag\{[^{}]+\}", Some("flag{real}".into())).unwrap();
        OutcomeClassifier::new(proof, 3, 3)
    }

    fn completed(text: &str, exit: i32) -> Observation {
        Observation::from_raw(
            &RawOutput {
                stdout: text.to_string(),
                exit_code: Some(exit),
                ..RawOutput::default()
            },
            8000,
        )
    }

    fn run(c: &OutcomeClassifier, obs: &Observation, history: &FailureHistory) -> Outcome {
        let full = obs.text();
        c.classify(
            &ClassifyInput {
                action_key: "curl http://t/",
                hypothesis: 1,
                turn: 3,
                observation: obs,
                full_output: &full,
                previous_fingerprint: None,
            },
            history,
        )
    }

    #[test]
    fn test_timeout_is_tier1_network() {
        let obs = Observation::timed_out("execution timed out after 60000ms", 60000);
        let out = run(&classifier(), &obs, &FailureHistory::default());
        let rec = out.failure().unwrap();
        assert_eq!(rec.tier, Tier::Transient);
        assert_eq!(rec.category, FailureCategory::Network);
    }

    #[test]
    fn test_verified_proof_is_success() {
        let out = run(&classifier(), &completed("<b>FLAG{REAL}</b>", 0), &FailureHistory::default());
        assert_eq!(out.proof().unwrap().value, "FLAG{REAL}");
    }

    #[test]
    fn test_unverified_proof_does_not_succeed() {
        let out = run(&classifier(), &completed("flag{decoy}", 0), &FailureHistory::default());
        assert!(out.proof().is_none());
    }

    #[test]
    fn test_http_status_categories() {
        let c = classifier();
        let h = FailureHistory::default();
        let out = run(&c, &completed("HTTP/1.1 503 Service Unavailable", 0), &h);
        assert_eq!(out.failure().unwrap().category, FailureCategory::Target);
        let out = run(&c, &completed("HTTP/1.1 403 Forbidden", 0), &h);
        let rec = out.failure().unwrap();
        assert_eq!(rec.tier, Tier::Tactical);
        assert_eq!(rec.category, FailureCategory::Logic);
        let out = run(&c, &completed("sh: sqlmap: command not found", 127), &h);
        assert_eq!(out.failure().unwrap().category, FailureCategory::Tool);
    }

    #[test]
    fn test_repeated_tactical_promotes_to_strategic() {
        let c = classifier();
        let mut h = FailureHistory::default();
        let obs = completed("Login failed", 0);
        for expected in [Tier::Tactical, Tier::Tactical, Tier::Strategic] {
            let out = run(&c, &obs, &h);
            assert_eq!(out.tier(), Some(expected));
            h.record(&out);
        }
    }

    #[test]
    fn test_unreachable_escalates_to_terminal() {
        let c = classifier();
        let mut h = FailureHistory::default();
        let obs = completed("curl: (7) Failed to connect: Connection refused", 7);
        for expected in [Tier::Transient, Tier::Transient, Tier::Terminal] {
            let out = run(&c, &obs, &h);
            let rec = out.failure().unwrap();
            assert_eq!(rec.tier, expected);
            assert_eq!(rec.category, FailureCategory::Target);
            h.record(&out);
        }
    }

    #[test]
    fn test_unchanged_output_is_tactical() {
        let c = classifier();
        let obs = completed("<html>same page</html>", 0);
        let full = obs.text();
        let out = c.classify(
            &ClassifyInput {
                action_key: "k",
                hypothesis: 0,
                turn: 1,
                observation: &obs,
                full_output: &full,
                previous_fingerprint: Some(&obs.fingerprint),
            },
            &FailureHistory::default(),
        );
        assert_eq!(out.tier(), Some(Tier::Tactical));
    }

    #[test]
    fn test_progress_and_ambiguous() {
        let c = classifier();
        let h = FailureHistory::default();
        assert_eq!(
            run(&c, &completed("HTTP/1.1 200 OK\n\nhello", 0), &h),
            Outcome::Success { proof: None }
        );
        assert_eq!(run(&c, &completed("some banner text", 0), &h), Outcome::Ambiguous);
    }

    #[test]
    fn test_deterministic() {
        let c = classifier();
        let h = FailureHistory::default();
        let obs = completed("HTTP/1.1 404 Not Found", 0);
        assert_eq!(run(&c, &obs, &h), run(&c, &obs, &h));
    }

    #[test]
    fn test_call_failure_is_tier1() {
        let c = classifier();
        let err = ControllerError::MalformedResponse {
            role: "attacker".into(),
            reason: "no json".into(),
            raw: "blah".into(),
        };
        let out = c.classify_call_failure("attacker", &err, 2);
        let rec = out.failure().unwrap();
        assert_eq!(rec.tier, Tier::Transient);
        assert_eq!(rec.category, FailureCategory::Unknown);
        assert!(rec.action_key.is_none());
    }
}

//! 证明产物（flag）提取与校验
//!
//! 只认沙箱输出中的候选；推理服务文本里出现的 flag 从不计入（模型可能凭空编造）。

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ProofConfig;
use crate::core::ControllerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArtifact {
    pub value: String,
    /// 产生该产物的 Turn 序号
    pub turn: usize,
}

#[derive(Debug, Clone)]
pub struct ProofVerifier {
    pattern: Regex,
    expected: Option<String>,
}

impl ProofVerifier {
    pub fn new(pattern: &str, expected: Option<String>) -> Result<Self, ControllerError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ControllerError::Config(format!("invalid proof pattern: {}", e)))?;
        Ok(Self {
            pattern,
            expected: expected.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
        })
    }

    pub fn from_config(cfg: &ProofConfig) -> Result<Self, ControllerError> {
        Self::new(&cfg.pattern, cfg.expected_value())
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn has_expected(&self) -> bool {
        self.expected.is_some()
    }

    /// 文本中所有候选（去重，保持出现顺序）
    pub fn candidates(&self, text: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|c| seen.insert(c.to_lowercase()))
            .collect()
    }

    /// 与期望值比较（去空白、忽略大小写）；未配置期望值时格式正确即视为通过
    pub fn verify(&self, candidate: &str) -> bool {
        match &self.expected {
            Some(expected) => candidate.trim().eq_ignore_ascii_case(expected),
            None => self.pattern.is_match(candidate),
        }
    }

    /// 沙箱输出中第一个通过校验的产物
    pub fn find_verified(&self, text: &str, turn: usize) -> Option<ProofArtifact> {
        self.candidates(text)
            .into_iter()
            .find(|c| self.verify(c))
            .map(|value| ProofArtifact { value, turn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_verifier(expected: Option<&str>) -> ProofVerifier {
        ProofVerifier::new(&ProofConfig::default().pattern, expected.map(String::from)).unwrap()
    }

    #[test]
    fn test_candidates_case_insensitive_and_nested() {
        let v = default_verifier(None);
        let text = "x FLAG{abc} y flag{outer{inner}} z Flag{abc}";
        assert_eq!(v.candidates(text), vec!["FLAG{abc}", "flag{outer{inner}}"]);
    }

    #[test]
    fn test_verify_against_expected() {
        let v = default_verifier(Some("flag{real}"));
        assert!(v.verify("FLAG{REAL}"));
        assert!(!v.verify("flag{fake}"));
        assert!(v.find_verified("decoy flag{fake} then flag{real}", 4).is_some());
        assert_eq!(v.find_verified("flag{fake}", 4), None);
    }

    #[test]
    fn test_without_expected_well_formed_counts() {
        let v = default_verifier(None);
        let artifact = v.find_verified("<p>flag{x1}</p>", 2).unwrap();
        assert_eq!(artifact.value, "flag{x1}");
        assert_eq!(artifact.turn, 2);
        assert!(v.find_verified("flag{}", 2).is_none());
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        assert!(matches!(
            ProofVerifier::new("flag{(", None),
            Err(ControllerError::Config(_))
        ));
    }
}

//! 重复检测：最近 N 个 Action/Observation 对的环形窗口
//!
//! 归一化：命令小写、折叠空白、统一引号，并把请求参数（curl -d / --data、data= / params= 字典、
//! a=1&b=2 表单）抽出排序，等价请求得到相同的 key。
//!
//! 判定：新对与窗口内条目比较，
//! - 动作相同：参数一致且命令骨架近似（归一化编辑距离 ≥ similarity）
//! - 响应签名相同：命令骨架近似且响应长度相等（不同参数得到同样的响应）
//!
//! 任一计数（含新对本身）≥ threshold 即标记重复。窗口在策略切换时清空。

use std::collections::VecDeque;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::sandbox::{Action, Observation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedAction {
    /// 去掉请求参数后的命令骨架
    pub skeleton: String,
    /// 排序后的请求参数（k=v&k=v），无参数时为空
    pub params: String,
}

impl NormalizedAction {
    /// 精确 key：用于失败历史中的“同一具体动作”
    pub fn key(&self) -> String {
        if self.params.is_empty() {
            self.skeleton.clone()
        } else {
            format!("{}|{}", self.skeleton, self.params)
        }
    }
}

fn param_regexes() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            r#"data\s*=\s*(\{[^}]+\})"#,
            r#"params\s*=\s*(\{[^}]+\})"#,
            r#"(?:^|\s)-d\s+["']([^"']+)["']"#,
            r#"--data(?:-raw|-urlencode)?\s+["']([^"']+)["']"#,
            r#"(?:^|\s)-d\s+([^\s"']+)"#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn dict_pair_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["']?([\w\-]+)["']?\s*:\s*["']?([^,"'}]*)["']?"#).ok())
        .as_ref()
}

fn length_regexes() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            r"(?i)content-length[:\s]+(\d+)",
            r"(?i)\blen(?:gth)?[:\s]+(\d+)",
            r"(?i)\bsize[:\s]+(\d+)",
            r"(?i)(\d+)\s*bytes?\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// 把参数串规范化为排序后的 k=v&k=v；字典与表单两种写法得到同样结果
fn canonical_params(raw: &str) -> String {
    let raw = raw.trim();
    let mut pairs: Vec<(String, String)> = if raw.starts_with('{') {
        dict_pair_regex()
            .map(|re| {
                re.captures_iter(raw)
                    .map(|c| (c[1].to_string(), c[2].trim().to_string()))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        raw.split('&')
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
                None => (p.trim().to_string(), String::new()),
            })
            .collect()
    };
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// 从命令 / 脚本中抽取请求参数（排序后）
pub fn extract_request_params(text: &str) -> Option<String> {
    param_regexes()
        .iter()
        .find_map(|re| re.captures(text).map(|c| canonical_params(&c[1])))
        .filter(|p| !p.is_empty())
}

/// 响应签名：输出中报告的 Content-Length / N bytes / len: N，否则为全文字符数
pub fn extract_response_length(output: &str) -> usize {
    length_regexes()
        .iter()
        .find_map(|re| {
            re.captures(output)
                .and_then(|c| c[1].parse::<usize>().ok())
        })
        .unwrap_or_else(|| output.chars().count())
}

pub fn normalize_action(action: &Action) -> NormalizedAction {
    let text = action.text();
    let params = extract_request_params(text).unwrap_or_default();
    let mut skeleton = text.to_string();
    for re in param_regexes() {
        skeleton = re.replace_all(&skeleton, " ").into_owned();
    }
    let skeleton = skeleton
        .replace('\'', "\"")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    NormalizedAction { skeleton, params }
}

#[derive(Debug, Clone)]
struct WindowEntry {
    action: NormalizedAction,
    response_len: usize,
    fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepetitionSignal {
    pub flagged: bool,
    /// 含新对本身
    pub action_matches: usize,
    pub signature_matches: usize,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RepetitionDetector {
    window: VecDeque<WindowEntry>,
    capacity: usize,
    threshold: usize,
    similarity: f64,
}

impl RepetitionDetector {
    pub fn new(capacity: usize, threshold: usize, similarity: f64) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            threshold: threshold.max(1),
            similarity,
        }
    }

    fn skeleton_close(&self, a: &str, b: &str) -> bool {
        a == b || strsim::normalized_levenshtein(a, b) >= self.similarity
    }

    /// 比较新对与窗口，再把新对压入窗口（满则淘汰最旧）
    pub fn observe(&mut self, action: &NormalizedAction, observation: &Observation) -> RepetitionSignal {
        let mut action_matches = 1;
        let mut signature_matches = 1;
        for entry in &self.window {
            if !self.skeleton_close(&entry.action.skeleton, &action.skeleton) {
                continue;
            }
            // 响应长度不同说明目标给出了新内容，不算原地打转
            let same_len = entry.response_len == observation.response_len;
            if same_len && entry.action.params == action.params {
                action_matches += 1;
            }
            if observation.response_len > 0 && same_len {
                signature_matches += 1;
            }
        }

        let reason = if action_matches >= self.threshold {
            Some(format!(
                "same action repeated {} times in last {} actions",
                action_matches,
                self.window.len() + 1
            ))
        } else if signature_matches >= self.threshold {
            Some(format!(
                "same response shape ({} bytes) {} times in last {} actions",
                observation.response_len,
                signature_matches,
                self.window.len() + 1
            ))
        } else {
            None
        };

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(WindowEntry {
            action: action.clone(),
            response_len: observation.response_len,
            fingerprint: observation.fingerprint.clone(),
        });

        RepetitionSignal {
            flagged: reason.is_some(),
            action_matches,
            signature_matches,
            reason,
        }
    }

    /// 同一精确动作最近一次观察的指纹（Classifier 判断“输出未变化”）
    pub fn last_fingerprint_for(&self, action: &NormalizedAction) -> Option<&str> {
        self.window
            .iter()
            .rev()
            .find(|e| e.action == *action)
            .map(|e| e.fingerprint.as_str())
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

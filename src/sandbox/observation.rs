//! Observation：一个 Action 的执行结果（与 Action 一一对应）
//!
//! 指纹、响应长度都在截断之前按完整输出计算；截断只影响进入上下文的文本。

use serde::{Deserialize, Serialize};

use crate::core::fingerprint;
use crate::sandbox::RawOutput;
use crate::signals::extract_response_length;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Completed,
    TimedOut,
    SandboxFailed,
    /// 无任何输出也无退出码
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub status: ObservationStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub truncated: bool,
    /// 完整输出字符数
    pub raw_len: usize,
    /// 响应形状签名（Content-Length / N bytes / 完整长度）
    pub response_len: usize,
    /// 完整输出的指纹
    pub fingerprint: String,
    /// 失败时的说明（超时时长、沙箱错误等）
    pub detail: Option<String>,
}

impl Observation {
    /// 由沙箱原始输出构造；超过 max_chars 时保留首尾
    pub fn from_raw(raw: &RawOutput, max_chars: usize) -> Self {
        let full = raw.combined();
        let status = if raw.timed_out {
            ObservationStatus::TimedOut
        } else if full.trim().is_empty() && raw.exit_code.is_none() {
            ObservationStatus::Malformed
        } else {
            ObservationStatus::Completed
        };
        let (stdout, out_cut) = truncate_middle(&raw.stdout, max_chars);
        let (stderr, err_cut) = truncate_middle(&raw.stderr, (max_chars / 4).max(256));
        let exit = raw
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        Self {
            status,
            stdout,
            stderr,
            exit_code: raw.exit_code,
            duration_ms: raw.duration.as_millis() as u64,
            truncated: out_cut || err_cut,
            raw_len: full.chars().count(),
            response_len: extract_response_length(&full),
            fingerprint: fingerprint(&[&exit, &full]),
            detail: if raw.timed_out {
                Some(format!("execution timed out after {}ms", raw.duration.as_millis()))
            } else {
                None
            },
        }
    }

    pub fn timed_out(detail: impl Into<String>, duration_ms: u64) -> Self {
        Self::failed(ObservationStatus::TimedOut, detail.into(), duration_ms)
    }

    pub fn sandbox_failed(detail: impl Into<String>, duration_ms: u64) -> Self {
        Self::failed(ObservationStatus::SandboxFailed, detail.into(), duration_ms)
    }

    fn failed(status: ObservationStatus, detail: String, duration_ms: u64) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            duration_ms,
            truncated: false,
            raw_len: 0,
            response_len: 0,
            fingerprint: fingerprint(&[&format!("{:?}", status), &detail]),
            detail: Some(detail),
        }
    }

    /// 进入上下文的文本（可能已截断）
    pub fn text(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n[stderr]\n{}", self.stdout, self.stderr),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ObservationStatus::Completed
    }
}

/// 超长文本保留头 60% 与尾 40%，中间替换为省略标记
pub fn truncate_middle(text: &str, max_chars: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text.to_string(), false);
    }
    let head_len = max_chars * 3 / 5;
    let tail_len = max_chars - head_len;
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();
    let elided = total - head_len - tail_len;
    (
        format!("{}\n... [{} chars elided] ...\n{}", head, elided, tail),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_truncate_keeps_head_and_tail() {
        let text = format!("HEAD{}TAIL", "x".repeat(1000));
        let (cut, truncated) = truncate_middle(&text, 100);
        assert!(truncated);
        assert!(cut.starts_with("HEAD"));
        assert!(cut.ends_with("TAIL"));
        assert!(cut.contains("chars elided"));

        let (same, truncated) = truncate_middle("short", 100);
        assert!(!truncated);
        assert_eq!(same, "short");
    }

    #[test]
    fn test_fingerprint_uses_untruncated_output() {
        let a = RawOutput {
            stdout: format!("{}A{}", "x".repeat(500), "y".repeat(500)),
            exit_code: Some(0),
            ..RawOutput::default()
        };
        let b = RawOutput {
            stdout: format!("{}B{}", "x".repeat(500), "y".repeat(500)),
            exit_code: Some(0),
            ..RawOutput::default()
        };
        let oa = Observation::from_raw(&a, 100);
        let ob = Observation::from_raw(&b, 100);
        assert_eq!(oa.text(), ob.text());
        assert_ne!(oa.fingerprint, ob.fingerprint);
        assert_eq!(oa.raw_len, 1001);
    }

    #[test]
    fn test_status_from_raw() {
        let timed = RawOutput {
            timed_out: true,
            duration: Duration::from_secs(3),
            ..RawOutput::default()
        };
        let obs = Observation::from_raw(&timed, 100);
        assert_eq!(obs.status, ObservationStatus::TimedOut);
        assert!(obs.detail.unwrap().contains("3000ms"));

        let empty = RawOutput::default();
        assert_eq!(
            Observation::from_raw(&empty, 100).status,
            ObservationStatus::Malformed
        );

        let silent_ok = RawOutput {
            exit_code: Some(0),
            ..RawOutput::default()
        };
        assert!(Observation::from_raw(&silent_ok, 100).is_completed());
    }
}

//! 角色输出解析
//!
//! 从文本中提取 JSON（```json 代码块、``` 代码块或首个 `{` 到最后一个 `}`），再按角色解析。
//! 解析失败返回 MalformedResponse，原文保留在 raw 中供诊断。

use serde::Deserialize;
use serde_json::Value;

use crate::core::ControllerError;
use crate::roles::{ReviewStatus, ReviewVerdict, Role};
use crate::sandbox::Action;

/// 提取 JSON 片段；找不到时返回 None
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn malformed(role: Role, reason: impl Into<String>, raw: &str) -> ControllerError {
    ControllerError::MalformedResponse {
        role: role.as_str().to_string(),
        reason: reason.into(),
        raw: raw.chars().take(2000).collect(),
    }
}

/// Advisor：任意非空文本即为建议
pub fn parse_advice(raw: &str) -> Result<String, ControllerError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(malformed(Role::Advisor, "empty advice", raw));
    }
    Ok(text.to_string())
}

/// Attacker 可接受的几种写法
#[derive(Debug, Deserialize)]
struct ActionSpec {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default, alias = "lang")]
    language: Option<String>,
    #[serde(default, alias = "thought", alias = "reason")]
    description: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    /// {"tool": "execute_command", "args": {"command": "..."}}
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<Value>,
}

/// Attacker：JSON 中的 command 或 script；也接受 tool + args 形式
pub fn parse_action(raw: &str) -> Result<Action, ControllerError> {
    let json = extract_json_block(raw)
        .ok_or_else(|| malformed(Role::Attacker, "no JSON object in response", raw))?;
    let spec: ActionSpec = serde_json::from_str(json)
        .map_err(|e| malformed(Role::Attacker, format!("invalid JSON: {}", e), raw))?;

    let arg = |key: &str| {
        spec.args
            .as_ref()
            .and_then(|a| a.get(key))
            .and_then(|v| v.as_str())
            .map(String::from)
    };

    let mut action = if let Some(command) = spec.command.clone().or_else(|| arg("command")) {
        Action::command(command)
    } else if let Some(source) = spec.script.clone().or_else(|| arg("code")).or_else(|| arg("script")) {
        let language = spec
            .language
            .clone()
            .or_else(|| arg("language"))
            .or_else(|| spec.tool.as_deref().filter(|t| t.contains("python")).map(|_| "python".to_string()))
            .unwrap_or_else(|| "python".to_string());
        Action::script(language, source)
    } else {
        return Err(malformed(Role::Attacker, "neither command nor script present", raw));
    };

    if action.text().trim().is_empty() {
        return Err(malformed(Role::Attacker, "empty command", raw));
    }
    action.description = spec.description.unwrap_or_default();
    action.timeout_secs = spec.timeout_secs;
    Ok(action)
}

/// Reviewer：{"audit_result": {"status": ...}} 或扁平的 {"status": ...}
pub fn parse_review(raw: &str) -> Result<ReviewVerdict, ControllerError> {
    let json = extract_json_block(raw)
        .ok_or_else(|| malformed(Role::Reviewer, "no JSON object in response", raw))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| malformed(Role::Reviewer, format!("invalid JSON: {}", e), raw))?;

    let audit = value.get("audit_result").unwrap_or(&value);
    let status = audit
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| malformed(Role::Reviewer, "missing status", raw))?;
    let status = match status.trim().to_uppercase().as_str() {
        "VERIFIED" | "SUCCESS" => ReviewStatus::Verified,
        "PARTIAL" | "PARTIAL_SUCCESS" | "IN_PROGRESS" => ReviewStatus::Partial,
        "FAILED" | "FAILURE" => ReviewStatus::Failed,
        other => return Err(malformed(Role::Reviewer, format!("unknown status {}", other), raw)),
    };

    let confidence = audit
        .get("confidence")
        .and_then(|c| c.as_f64())
        .map(|c| c as f32);
    let reasoning = value
        .get("reasoning")
        .or_else(|| audit.get("reasoning"))
        .and_then(|r| r.as_str())
        .unwrap_or_default()
        .to_string();
    let failure_level = value
        .get("failure_analysis")
        .and_then(|f| f.get("level"))
        .or_else(|| audit.get("failure_level"))
        .and_then(|l| l.as_str())
        .map(String::from);
    let recommendations = value
        .get("recommendations")
        .and_then(|r| r.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| {
                    i.as_str()
                        .map(String::from)
                        .or_else(|| i.get("action").and_then(|a| a.as_str()).map(String::from))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ReviewVerdict {
        status,
        confidence,
        reasoning,
        failure_level,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ActionBody;

    #[test]
    fn test_extract_fenced_and_embedded() {
        assert_eq!(extract_json_block("x ```json\n{\"a\":1}\n``` y"), Some("{\"a\":1}"));
        assert_eq!(extract_json_block("```\n{\"a\":2}\n```"), Some("{\"a\":2}"));
        assert_eq!(extract_json_block("I will run {\"a\":3} now"), Some("{\"a\":3}"));
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn test_parse_command_action() {
        let a = parse_action(r#"{"command": "curl -s http://t/", "description": "probe", "timeout_secs": 10}"#).unwrap();
        assert_eq!(a.text(), "curl -s http://t/");
        assert_eq!(a.description, "probe");
        assert_eq!(a.timeout_secs, Some(10));
    }

    #[test]
    fn test_parse_tool_style_script() {
        let a = parse_action(
            "```json\n{\"tool\": \"execute_python\", \"args\": {\"code\": \"print(1)\"}}\n```",
        )
        .unwrap();
        assert_eq!(
            a.body,
            ActionBody::Script {
                language: "python".into(),
                source: "print(1)".into()
            }
        );
    }

    #[test]
    fn test_parse_action_malformed_keeps_raw() {
        let err = parse_action("let me think about it").unwrap_err();
        match err {
            ControllerError::MalformedResponse { role, raw, .. } => {
                assert_eq!(role, "attacker");
                assert_eq!(raw, "let me think about it");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_action(r#"{"command": "  "}"#).is_err());
        assert!(parse_action(r#"{"description": "nothing"}"#).is_err());
    }

    #[test]
    fn test_parse_review_nested_and_flat() {
        let v = parse_review(
            r#"{"audit_result": {"status": "FAILED", "confidence": 0.8},
                "failure_analysis": {"level": "L2"},
                "recommendations": [{"action": "try sqlmap"}, "check robots.txt"],
                "reasoning": "login rejected"}"#,
        )
        .unwrap();
        assert_eq!(v.status, ReviewStatus::Failed);
        assert_eq!(v.failure_level.as_deref(), Some("L2"));
        assert_eq!(v.recommendations, vec!["try sqlmap", "check robots.txt"]);
        assert_eq!(v.reasoning, "login rejected");

        let flat = parse_review(r#"{"status": "partial"}"#).unwrap();
        assert_eq!(flat.status, ReviewStatus::Partial);
        assert!(parse_review(r#"{"status": "maybe"}"#).is_err());
    }

    #[test]
    fn test_parse_advice() {
        assert_eq!(parse_advice("  enumerate  ").unwrap(), "enumerate");
        assert!(parse_advice("   ").is_err());
    }
}

//! 内置角色提示词；`app.prompts_dir` 下的 advisor.md / attacker.md / reviewer.md 可覆盖

use std::path::Path;

use crate::roles::Role;

pub const ADVISOR_PROMPT: &str = "ROLE: ADVISOR
You are the strategy advisor of an authorized penetration test.
Read the objective, key findings and recent turns, then propose ONE concrete next hypothesis
and the method to test it. Respect any directive: if told to switch method or attack category,
do not propose the failed approach again. Answer in plain text, at most 200 words.";

pub const ATTACKER_PROMPT: &str = "ROLE: ATTACKER
You execute the advisor's current hypothesis against the target inside a sandbox.
Respond with exactly one JSON object and nothing else:
{\"command\": \"<shell command>\", \"description\": \"<why>\"}
or, for a script:
{\"script\": \"<source>\", \"language\": \"python\", \"description\": \"<why>\"}
Optional: \"timeout_secs\". Never invent output; you will see the real result next turn.";

pub const REVIEWER_PROMPT: &str = "ROLE: REVIEWER
You audit the latest attacker turn. Judge only from the real sandbox output.
Respond with one JSON object:
{\"audit_result\": {\"status\": \"VERIFIED|PARTIAL|FAILED\", \"confidence\": 0.0-1.0},
 \"failure_analysis\": {\"level\": \"L1|L2|L3|L4\"},
 \"recommendations\": [\"...\"], \"reasoning\": \"...\"}
VERIFIED only when the proof artifact appears in sandbox output. PARTIAL keeps the current
hypothesis; FAILED asks the advisor for a new plan.";

pub fn builtin(role: Role) -> &'static str {
    match role {
        Role::Advisor => ADVISOR_PROMPT,
        Role::Attacker => ATTACKER_PROMPT,
        Role::Reviewer => REVIEWER_PROMPT,
    }
}

/// 从目录加载提示词，缺失时用内置；首行角色标记总是保留
pub fn load(role: Role, dir: Option<&Path>) -> String {
    let custom = dir
        .map(|d| d.join(format!("{}.md", role.as_str())))
        .and_then(|p| std::fs::read_to_string(p).ok())
        .filter(|s| !s.trim().is_empty());
    match custom {
        Some(text) => format!("ROLE: {}\n{}", role, text.trim()),
        None => builtin(role).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_prompts_carry_role_marker() {
        assert!(load(Role::Advisor, None).starts_with("ROLE: ADVISOR"));
        assert!(load(Role::Attacker, None).contains("\"command\""));
    }

    #[test]
    fn test_custom_prompt_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("reviewer.md"), "Be strict.").unwrap();
        let text = load(Role::Reviewer, Some(dir.path()));
        assert_eq!(text, "ROLE: REVIEWER\nBe strict.");
        assert_eq!(load(Role::Advisor, Some(dir.path())), ADVISOR_PROMPT);
    }
}

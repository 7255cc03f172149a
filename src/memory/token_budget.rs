//! 实时上下文大小估算
//!
//! 不依赖具体分词器：ASCII 约 4 字符/token，非 ASCII 约 1.5 字符/token。

/// Token 估算器（字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量；空文本为 0
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;
        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }
        ascii_chars.div_ceil(4) + (non_ascii_chars as f64 / 1.5).ceil() as usize
    }

    /// 截断到不超过 max_tokens；截断时追加标记（标记本身计入预算）
    pub fn truncate(text: &str, max_tokens: usize) -> String {
        if Self::estimate(text) <= max_tokens {
            return text.to_string();
        }
        const MARKER: &str = " ...[trimmed]";
        let budget = max_tokens.saturating_sub(Self::estimate(MARKER));
        if budget == 0 {
            return String::new();
        }
        let mut used_ascii = 0usize;
        let mut used_non_ascii = 0usize;
        let mut out = String::new();
        for c in text.chars() {
            if c.is_ascii() {
                used_ascii += 1;
            } else {
                used_non_ascii += 1;
            }
            let cost = used_ascii.div_ceil(4) + (used_non_ascii as f64 / 1.5).ceil() as usize;
            if cost > budget {
                break;
            }
            out.push(c);
        }
        out.push_str(MARKER);
        out
    }
}

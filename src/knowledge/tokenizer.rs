//! 分词模块
//!
//! 英文按 `\b\w\w+\b` 取词（至少两个词字符），统一小写；
//! 包含 CJK 字符时先用 jieba-rs 切分，中文片段单字也保留，其余片段再按英文规则取词。

use std::sync::OnceLock;

use jieba_rs::Jieba;
use regex::Regex;

use crate::knowledge::stop_words::is_stop_word;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

static TOKEN_PATTERN: OnceLock<Regex> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn token_pattern() -> &'static Regex {
    TOKEN_PATTERN.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("static token pattern"))
}

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn push_latin(segment: &str, out: &mut Vec<String>) {
    out.extend(token_pattern().find_iter(segment).map(|m| m.as_str().to_string()));
}

/// 分词（不去停用词），保持出现顺序
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();
    if lower.trim().is_empty() {
        return tokens;
    }

    if contains_cjk(&lower) {
        for segment in get_jieba().cut(&lower, true) {
            if contains_cjk(segment) {
                let segment = segment.trim();
                if !segment.is_empty() {
                    tokens.push(segment.to_string());
                }
            } else {
                push_latin(segment, &mut tokens);
            }
        }
    } else {
        push_latin(&lower, &mut tokens);
    }
    tokens
}

/// 分词并去除英文停用词（TF-IDF 使用）
pub fn analyze(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stop_word(t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_english() {
        let tokens = tokenize("You won the Lottery! Claim your prize, a B c.");
        assert_eq!(
            tokens,
            vec!["you", "won", "the", "lottery", "claim", "your", "prize"]
        );
    }

    #[test]
    fn test_analyze_drops_stop_words() {
        let tokens = analyze("You won the lottery! Claim your prize now");
        assert_eq!(tokens, vec!["won", "lottery", "claim", "prize"]);
    }

    #[test]
    fn test_tokenize_keeps_digits_and_underscores() {
        let tokens = tokenize("invoice_42 due in 24 hours");
        assert!(tokens.contains(&"invoice_42".to_string()));
        assert!(tokens.contains(&"24".to_string()));
    }

    #[test]
    fn test_tokenize_mixed_cjk() {
        let tokens = tokenize("品牌合作 sponsorship 邀请");
        assert!(tokens.iter().any(|t| t == "sponsorship"));
        assert!(tokens.iter().any(|t| contains_cjk(t)));
    }

    #[test]
    fn test_tokenize_blank() {
        assert!(tokenize("   ").is_empty());
    }
}

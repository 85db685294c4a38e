//! 文本截断（按字符计，不会切断 UTF-8 字符）

/// 最多保留前 max 个字符
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// 超长时截断并追加省略号
pub fn preview(s: &str, max: usize) -> String {
    let head = truncate_chars(s, max);
    if head.len() < s.len() {
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("营销内容", 2), "营销");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_preview_only_marks_truncated_text() {
        assert_eq!(preview("Hello", 200), "Hello");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}

//! 文本工具

/// 日志预览, 超出 max_chars 时截断并追加 "..."
///
/// 按字符而非字节截断, 避免切断多字节字符
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_short_text_unchanged() {
        assert_eq!(preview("hello", 100), "hello");
        assert_eq!(preview("", 3), "");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("生成一张图片", 2), "生成...");
        assert_eq!(preview("abc", 3), "abc");
    }
}

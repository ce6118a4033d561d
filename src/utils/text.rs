pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Lossy UTF-8 preview of a response body, cut at `max_bytes`.
pub fn body_preview(bytes: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_bytes {
        return text.into_owned();
    }
    format!("{}...", truncate_utf8_prefix(&text, max_bytes))
}

#[cfg(test)]
mod tests {
    use super::{body_preview, truncate_utf8_prefix};

    #[test]
    fn truncate_utf8_prefix_does_not_split_utf8() {
        assert_eq!(truncate_utf8_prefix("a\u{1F600}b", 2), "a");
        assert_eq!(truncate_utf8_prefix("a\u{1F600}b", 5), "a\u{1F600}");
        assert_eq!(truncate_utf8_prefix("abc", 0), "");
    }

    #[test]
    fn body_preview_marks_truncation() {
        assert_eq!(body_preview(b"short", 16), "short");
        assert_eq!(body_preview(b"0123456789", 4), "0123...");
    }
}

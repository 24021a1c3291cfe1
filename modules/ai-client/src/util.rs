/// Longest prefix of `s` no longer than `max_bytes` that ends on a char boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let end = (0..=max_bytes)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    &s[..end]
}

/// The body of a reply wrapped in a markdown fence. The opening fence may
/// carry any info string (` ```json `, ` ```JSON `, ...) and the closing fence
/// may be missing. Unfenced text comes back trimmed.
pub fn strip_code_blocks(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(after_fence) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => after_fence.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibyte_char_is_never_split() {
        let text = "naïve café";
        // 'ï' occupies bytes 2..4; cutting at 3 falls back to 2.
        assert_eq!(truncate_to_char_boundary(text, 3), "na");
        assert_eq!(truncate_to_char_boundary(text, 0), "");
    }

    #[test]
    fn short_input_is_returned_whole() {
        assert_eq!(truncate_to_char_boundary("ok", 10), "ok");
    }

    #[test]
    fn fence_with_any_info_string_is_removed() {
        assert_eq!(strip_code_blocks("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_blocks("```javascript\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```json {} ```"), "{}");
    }

    #[test]
    fn unclosed_fence_and_bare_text() {
        assert_eq!(strip_code_blocks("```json\n{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_blocks("  {\"a\":1}\n"), "{\"a\":1}");
    }
}

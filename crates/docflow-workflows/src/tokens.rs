//! Token estimation for work item content

/// Characters per token used when no configuration is supplied
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `content`.
///
/// Rough approximation of `ceil(chars / chars_per_token)`; any non-empty
/// content counts as at least one token. A `chars_per_token` of zero falls
/// back to [`DEFAULT_CHARS_PER_TOKEN`].
pub fn estimate_tokens(content: &str, chars_per_token: usize) -> usize {
    let divisor = if chars_per_token == 0 {
        DEFAULT_CHARS_PER_TOKEN
    } else {
        chars_per_token
    };

    let chars = content.chars().count();
    if chars == 0 {
        return 0;
    }

    chars.div_ceil(divisor).max(1)
}

/// Estimate tokens from a byte length, for producers that only know file sizes
pub fn estimate_tokens_from_len(len: u64, chars_per_token: usize) -> usize {
    let divisor = if chars_per_token == 0 {
        DEFAULT_CHARS_PER_TOKEN
    } else {
        chars_per_token
    } as u64;

    usize::try_from(len.div_ceil(divisor)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_content_has_no_tokens() {
        assert_eq!(estimate_tokens("", 4), 0);
    }

    #[test]
    fn test_short_content_counts_as_one() {
        assert_eq!(estimate_tokens("a", 4), 1);
        assert_eq!(estimate_tokens("abcd", 4), 1);
        assert_eq!(estimate_tokens("abcde", 4), 2);
    }

    #[test]
    fn test_zero_ratio_uses_default() {
        assert_eq!(estimate_tokens("abcdefgh", 0), 2);
        assert_eq!(estimate_tokens_from_len(9, 0), 3);
    }

    #[test]
    fn test_multibyte_counts_chars() {
        // 4 chars, 12 bytes
        assert_eq!(estimate_tokens("日本語!", 4), 1);
    }

    #[test]
    fn test_from_len() {
        assert_eq!(estimate_tokens_from_len(0, 4), 0);
        assert_eq!(estimate_tokens_from_len(4000, 4), 1000);
        assert_eq!(estimate_tokens_from_len(4001, 4), 1001);
    }
}

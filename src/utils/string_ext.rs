//! String helpers shared by capture, analysis and the admin API.

/// Truncate to at most `max_chars` characters, never splitting a UTF-8 code point.
#[inline]
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Last `max_chars` characters of `s`.
#[inline]
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let total = s.chars().count();
    if total <= max_chars {
        return s;
    }
    match s.char_indices().nth(total - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Short listing form: first `max_chars` characters, with `...` appended when cut.
pub fn ellipsize(s: &str, max_chars: usize) -> String {
    let head = truncate_chars(s, max_chars);
    if head.len() < s.len() { format!("{}...", head) } else { head.to_string() }
}

/// Trim-and-filter helpers for optional user input
pub trait StringExt {
    /// Trimmed value, `None` when blank
    fn clean(&self) -> Option<String>;
}

impl StringExt for str {
    #[inline]
    fn clean(&self) -> Option<String> {
        let trimmed = self.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    }
}

impl StringExt for String {
    #[inline]
    fn clean(&self) -> Option<String> {
        self.as_str().clean()
    }
}

impl<T: AsRef<str>> StringExt for Option<T> {
    #[inline]
    fn clean(&self) -> Option<String> {
        self.as_ref().and_then(|s| s.as_ref().clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
        assert_eq!(tail_chars("ñandú", 2), "dú");
    }

    #[test]
    fn test_ellipsize() {
        assert_eq!(ellipsize("SELECT 1", 100), "SELECT 1");
        assert_eq!(ellipsize("abcdef", 3), "abc...");
    }

    #[test]
    fn test_clean() {
        assert_eq!("  x ".clean(), Some("x".to_string()));
        assert_eq!("   ".clean(), None);
        assert_eq!(Some("").clean(), None);
        assert_eq!(None::<String>.clean(), None);
    }
}

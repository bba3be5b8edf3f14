//! Filename sanitization for template-expanded output names.
//!
//! Field values coming from the upstream API (titles, channel names) may
//! contain characters that are invalid on Windows, Linux or macOS. Valid
//! Unicode such as Japanese text is preserved.

/// Characters that are invalid in Windows filenames.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Sanitize a string for use as a single path component.
///
/// Control characters and path-unsafe characters are replaced with
/// underscores, consecutive replacements are collapsed, and leading/trailing
/// spaces and dots are trimmed.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    result.trim_matches(|c| c == ' ' || c == '.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_unchanged() {
        assert_eq!(sanitize_filename("hello world"), "hello world");
    }

    #[test]
    fn test_invalid_chars_replaced() {
        assert_eq!(sanitize_filename("hello?world"), "hello_world");
        assert_eq!(sanitize_filename("a:b/c"), "a_b_c");
    }

    #[test]
    fn test_consecutive_invalid_collapsed() {
        assert_eq!(sanitize_filename("a<>:\"b"), "a_b");
    }

    #[test]
    fn test_japanese_preserved() {
        assert_eq!(sanitize_filename("配信テスト"), "配信テスト");
        assert_eq!(sanitize_filename("配信?"), "配信_");
    }

    #[test]
    fn test_trim_spaces_and_dots() {
        assert_eq!(sanitize_filename("  name.  "), "name");
        assert_eq!(sanitize_filename("...dots..."), "dots");
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(sanitize_filename("a\x00b"), "a_b");
    }
}

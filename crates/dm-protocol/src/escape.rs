//! Field quoting for template records
//!
//! A field that contains a quote, comma, space or any control character is
//! wrapped in double quotes, and every embedded quote is doubled. Fields that
//! are already in quoted form are unwrapped first, so escaping an escaped
//! field yields the same text again.

/// Check whether a raw field must be wrapped in quotes
pub fn needs_quotes(text: &str) -> bool {
    text.chars()
        .any(|c| c == '"' || c == ',' || c == ' ' || c.is_control())
}

/// Check whether a field is in quoted form (`"..."`)
pub fn is_quoted(text: &str) -> bool {
    text.len() >= 2 && text.starts_with('"') && text.ends_with('"')
}

/// Escape free text for use as a single record field
pub fn escape(text: &str) -> String {
    let raw = unescape(text);
    if needs_quotes(&raw) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

/// Reverse [`escape`]: strip surrounding quotes and undouble embedded quotes
///
/// Text that is not in quoted form is returned unchanged.
pub fn unescape(text: &str) -> String {
    if is_quoted(text) {
        text[1..text.len() - 1].replace("\"\"", "\"")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_untouched() {
        assert_eq!(escape("c8y_Command"), "c8y_Command");
        assert_eq!(escape(""), "");
    }

    #[test]
    fn test_whitespace_and_commas_are_quoted() {
        assert_eq!(escape("hi\n"), "\"hi\n\"");
        assert_eq!(escape("a b"), "\"a b\"");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("a\tb"), "\"a\tb\"");
        assert_eq!(escape("a\rb"), "\"a\rb\"");
    }

    #[test]
    fn test_embedded_quotes_are_doubled() {
        assert_eq!(escape(r#"say "hi""#), r#""say ""hi""""#);
        assert_eq!(escape("\""), "\"\"\"\"");
    }

    #[test]
    fn test_escape_round_trips() {
        let samples = [
            "hi\n",
            "a, b",
            r#"he said "no", twice"#,
            "tab\there",
            "\"",
            "line one\nline two\n",
        ];
        for sample in samples {
            assert_eq!(unescape(&escape(sample)), sample, "sample {:?}", sample);
        }
    }

    #[test]
    fn test_escape_is_idempotent() {
        let samples = ["hi\n", "a, b", r#"he said "no""#, "plain"];
        for sample in samples {
            let once = escape(sample);
            assert_eq!(escape(&once), once, "sample {:?}", sample);
        }
    }

    #[test]
    fn test_unescape_leaves_unquoted_text() {
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(unescape("\"half"), "\"half");
    }
}

//! String-literal aware scanning of loosely formed JSON text
//!
//! Both functions walk the text once, tracking whether the cursor sits inside
//! a double- or single-quoted literal (with backslash escapes), so braces and
//! quotes inside string values are never mistaken for structure.

use std::iter::Peekable;
use std::str::Chars;

/// Marker substituted for apostrophes inside string values
pub const APOSTROPHE_MARKER: char = '`';

/// Byte offset just past the first top-level object, when another object
/// follows it back-to-back
///
/// Returns `None` for a single object (or unbalanced text), in which case the
/// text is left untouched.
pub fn first_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut literal: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if let Some(quote) = literal {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                literal = None;
            }
            continue;
        }

        match ch {
            '"' | '\'' => literal = Some(ch),
            '{' => depth += 1,
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let end = idx + 1;
                    return text[end..].trim_start().starts_with('{').then_some(end);
                }
            }
            _ => {}
        }
    }

    None
}

/// Rewrite non-standard quoting into strict JSON
///
/// - single-quoted literals become double-quoted, embedded `"` escaped
/// - apostrophes inside any literal become [`APOSTROPHE_MARKER`]
/// - a literal whose content is exactly `null` becomes the JSON `null`,
///   unless it is an object key
pub fn normalize_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' | '\'' => {
                let start = out.len();
                let content = copy_literal(ch, &mut chars, &mut out);
                if content == "null" && !followed_by_colon(&chars) {
                    out.truncate(start);
                    out.push_str("null");
                }
            }
            other => out.push(other),
        }
    }

    out
}

/// Copy one literal (opening quote already consumed) as a double-quoted
/// string, returning its content
fn copy_literal(quote: char, chars: &mut Peekable<Chars<'_>>, out: &mut String) -> String {
    let mut content = String::new();
    out.push('"');

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('\'') => {
                    out.push(APOSTROPHE_MARKER);
                    content.push(APOSTROPHE_MARKER);
                }
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                    content.push('\\');
                    content.push(next);
                }
                None => out.push('\\'),
            },
            c if c == quote => {
                out.push('"');
                return content;
            }
            '\'' => {
                out.push(APOSTROPHE_MARKER);
                content.push(APOSTROPHE_MARKER);
            }
            '"' => {
                out.push_str("\\\"");
                content.push('"');
            }
            c => {
                out.push(c);
                content.push(c);
            }
        }
    }

    // Unterminated: left for the JSON parser to report
    content
}

fn followed_by_colon(chars: &Peekable<Chars<'_>>) -> bool {
    chars.clone().find(|c| !c.is_whitespace()) == Some(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_object_end_concatenated() {
        let text = r#"{"a":{"b":1}}{"c":2}"#;
        assert_eq!(first_object_end(text), Some(13));

        let spaced = "{\"a\":1}\n  {\"c\":2}";
        assert_eq!(first_object_end(spaced), Some(7));
    }

    #[test]
    fn test_first_object_end_single_object() {
        assert_eq!(first_object_end(r#"{"a":1}"#), None);
        assert_eq!(first_object_end(r#"{"a":1} trailing"#), None);
        assert_eq!(first_object_end(r#"{"a":1"#), None);
    }

    #[test]
    fn test_first_object_end_ignores_braces_in_strings() {
        let text = r#"{"a":"}{"}{"b":1}"#;
        assert_eq!(first_object_end(text), Some(10));

        let single = r#"{'a':'x}{y'}{'b':1}"#;
        assert_eq!(first_object_end(single), Some(12));

        let escaped = r#"{"a":"\"}{"}{"b":1}"#;
        assert_eq!(first_object_end(escaped), Some(12));
    }

    #[test]
    fn test_normalize_single_quotes() {
        assert_eq!(
            normalize_quotes("{'a': 'b', 'c': [1, 'd']}"),
            r#"{"a": "b", "c": [1, "d"]}"#
        );
    }

    #[test]
    fn test_normalize_apostrophe_in_double_quotes() {
        assert_eq!(
            normalize_quotes(r#"{"name": "O'Brien"}"#),
            r#"{"name": "O`Brien"}"#
        );
    }

    #[test]
    fn test_normalize_double_quote_in_single_quotes() {
        assert_eq!(
            normalize_quotes(r#"{'q': 'say "hi"'}"#),
            r#"{"q": "say \"hi\""}"#
        );
    }

    #[test]
    fn test_normalize_null_literal() {
        assert_eq!(
            normalize_quotes(r#"{"a": "null", "b": ["null", 'null']}"#),
            r#"{"a": null, "b": [null, null]}"#
        );
        // Keys named null stay strings
        assert_eq!(normalize_quotes(r#"{"null" : 1}"#), r#"{"null" : 1}"#);
        // Only the exact content
        assert_eq!(normalize_quotes(r#"{"a": "nullable"}"#), r#"{"a": "nullable"}"#);
    }

    #[test]
    fn test_normalize_keeps_escapes() {
        assert_eq!(
            normalize_quotes(r#"{"a": "line\nbreak \"q\""}"#),
            r#"{"a": "line\nbreak \"q\""}"#
        );
    }
}

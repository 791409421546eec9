//! `[SUPPLEMENT]` lenient streaming JSON parsing for `toolcallDelta`
//! fragments, grounded in `original_source/koda/ai/json_parse.py`.
//!
//! Spec §4.A: "at each delta, the current buffer is fed to a lenient JSON
//! parser that returns the longest valid prefix parse (e.g. closing missing
//! braces/brackets)." The final authoritative `arguments` map is the
//! strict-parsed buffer at `toolcallEnd`, not this function's output.

/// Attempt to parse a potentially incomplete JSON buffer.
pub fn parse_streaming_json(buf: &str) -> Option<serde_json::Value> {
    let trimmed = buf.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    if trimmed.starts_with('{') {
        for closer in ["}", "}}"] {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&format!("{trimmed}{closer}")) {
                return Some(v);
            }
        }
    }

    if trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&format!("{trimmed}]")) {
            return Some(v);
        }
    }

    None
}

/// Parse as much of `buf` as forms valid JSON, returning the parsed value
/// and the unparsed remainder. Used where a caller needs to know how much
/// of the buffer was consumed rather than just whether it parsed.
pub fn try_parse_partial_json(buf: &str) -> (Option<serde_json::Value>, &str) {
    if buf.is_empty() {
        return (None, "");
    }
    if let Ok(v) = serde_json::from_str(buf) {
        return (Some(v), "");
    }
    for i in (1..buf.len()).rev() {
        if !buf.is_char_boundary(i) {
            continue;
        }
        if let Ok(v) = serde_json::from_str(&buf[..i]) {
            return (Some(v), &buf[i..]);
        }
    }
    (None, buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_object() {
        assert_eq!(
            parse_streaming_json(r#"{"key": "value"}"#),
            Some(serde_json::json!({"key": "value"}))
        );
    }

    #[test]
    fn parses_object_missing_closing_brace() {
        assert_eq!(
            parse_streaming_json(r#"{"key": "value""#),
            Some(serde_json::json!({"key": "value"}))
        );
    }

    #[test]
    fn returns_none_for_unparseable_fragment() {
        assert_eq!(parse_streaming_json(r#"{"key": "val"#), None);
    }

    #[test]
    fn partial_parse_returns_remainder() {
        let (value, rest) = try_parse_partial_json(r#"{"a":1}{"b""#);
        assert_eq!(value, Some(serde_json::json!({"a": 1})));
        assert_eq!(rest, r#"{"b""#);
    }
}

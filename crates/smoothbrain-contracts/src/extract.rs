//! Tolerant recovery of JSON from generation-server replies.
//!
//! Servers wrap their JSON in prose, code fences and the occasional trailing comma, and
//! sometimes stop mid-array. Everything here is pure; callers decide what an unusable
//! reply means.

use serde_json::{Map, Value};

enum Span {
    /// Balanced; exclusive end offset.
    Closed(usize),
    /// Ran out of text. Carries the end of the last complete top-level element, if any.
    Open { last_element_end: Option<usize> },
    Broken,
}

pub fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    let Some(open) = raw.find("```") else {
        return raw.to_string();
    };
    let after_ticks = &raw[open + 3..];
    // Skip the info string (`json`, `JSON`, ...) up to the end of the fence line.
    let body_start = after_ticks.find('\n').map(|idx| idx + 1).unwrap_or(0);
    let body = &after_ticks[body_start..];
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    let mut body = body.trim();
    if body_start == 0 {
        if let Some(rest) = body
            .get(..4)
            .filter(|tag| tag.eq_ignore_ascii_case("json"))
            .and_then(|_| body.get(4..))
        {
            body = rest.trim();
        }
    }
    body.to_string()
}

/// Drop commas that directly precede `]` or `}` outside of string literals.
pub fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = text[idx + 1..].trim_start().chars().next();
            if matches!(next, Some(']') | Some('}')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

fn scan_balanced(bytes: &[u8], start: usize) -> Span {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_element_end = None;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' => stack.push(b']'),
            b'{' => stack.push(b'}'),
            b']' | b'}' => {
                if stack.pop() != Some(byte) {
                    return Span::Broken;
                }
                let end = start + offset + 1;
                match stack.len() {
                    0 => return Span::Closed(end),
                    1 => last_element_end = Some(end),
                    _ => {}
                }
            }
            _ => {}
        }
    }
    Span::Open { last_element_end }
}

fn parse_lenient(candidate: &str) -> Option<Value> {
    serde_json::from_str(candidate)
        .ok()
        .or_else(|| serde_json::from_str(&strip_trailing_commas(candidate)).ok())
}

fn first_balanced(text: &str, open: char, accept: impl Fn(&Value) -> bool) -> Option<Value> {
    let cleaned = strip_code_fence(text);
    if let Some(value) = parse_lenient(&cleaned).filter(|value| accept(value)) {
        return Some(value);
    }
    let bytes = cleaned.as_bytes();
    let mut resume_at = 0;
    for (start, _) in cleaned.match_indices(open) {
        if start < resume_at {
            continue;
        }
        match scan_balanced(bytes, start) {
            Span::Closed(end) => {
                if let Some(value) = parse_lenient(&cleaned[start..end]).filter(|v| accept(v)) {
                    return Some(value);
                }
                resume_at = end;
            }
            Span::Open { last_element_end } => {
                // A cut-off array keeps its complete elements. A stray opener in prose
                // salvages nothing, so keep looking at the openers nested after it.
                let salvaged = last_element_end
                    .filter(|_| open == '[')
                    .and_then(|end| parse_lenient(&format!("{}]", &cleaned[start..end])))
                    .filter(|value| accept(value));
                if salvaged.is_some() {
                    return salvaged;
                }
            }
            Span::Broken => {}
        }
    }
    None
}

/// First JSON array found in `text`. A reply cut off mid-array yields its complete elements.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    match first_balanced(text, '[', Value::is_array)? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    match first_balanced(text, '{', Value::is_object)? {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

/// Array of objects each carrying a non-empty string under every `required` key.
/// Rows that do not qualify are dropped; `None` when nothing qualifies.
pub fn extract_object_list(text: &str, required: &[&str]) -> Option<Vec<Map<String, Value>>> {
    let rows: Vec<Map<String, Value>> = extract_json_array(text)?
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(object) => Some(object),
            _ => None,
        })
        .filter(|object| {
            required.iter().all(|key| {
                object
                    .get(*key)
                    .and_then(Value::as_str)
                    .is_some_and(|value| !value.trim().is_empty())
            })
        })
        .collect();
    if rows.is_empty() {
        return None;
    }
    Some(rows)
}

/// Reply text with fences and surrounding quotes removed, for plain-string answers.
pub fn clean_text_reply(text: &str) -> String {
    let cleaned = strip_code_fence(text);
    let trimmed = cleaned.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn array_inside_prose_is_found() {
        let reply = "Sure! Here are your shots:\n[{\"prompt\": \"a\", \"shot_label\": \"One\"}]\nEnjoy.";
        let items = extract_json_array(reply).unwrap_or_default();
        assert_eq!(items, vec![json!({"prompt": "a", "shot_label": "One"})]);
    }

    #[test]
    fn fenced_array_with_info_string() {
        let reply = "```json\n[{\"prompt\": \"a\"}, {\"prompt\": \"b\"}]\n```";
        assert_eq!(extract_json_array(reply).map(|items| items.len()), Some(2));
        let reply = "Here:\n```\n[1, 2]\n```\ntrailing words";
        assert_eq!(extract_json_array(reply), Some(vec![json!(1), json!(2)]));
    }

    #[test]
    fn trailing_commas_are_repaired() {
        let reply = "[{\"prompt\": \"a, b,\",}, {\"prompt\": \"c\"},]";
        let items = extract_json_array(reply).unwrap_or_default();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["prompt"], json!("a, b,"));
    }

    #[test]
    fn truncated_array_keeps_complete_elements() {
        let reply = "[{\"prompt\": \"first\"}, {\"prompt\": \"second\"}, {\"prompt\": \"thi";
        let items = extract_json_array(reply).unwrap_or_default();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["prompt"], json!("second"));
        assert!(extract_json_array("[{\"prompt\": \"never closed").is_none());
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_the_scan() {
        let reply = r#"Note [draft]: [{"prompt": "a [bracketed] \"quoted\" beat}"}]"#;
        let items = extract_json_array(reply).unwrap_or_default();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["prompt"], json!("a [bracketed] \"quoted\" beat}"));
    }

    #[test]
    fn unclosed_bracket_in_prose_does_not_hide_the_array() {
        let reply = "Here are your shots [draft: [{\"prompt\": \"a\", \"shot_label\": \"A\"}, {\"prompt\": \"b\", \"shot_label\": \"B\"}]";
        let rows = extract_object_list(reply, &["prompt"]);
        assert_eq!(rows.map(|rows| rows.len()), Some(2));

        let object = extract_json_object("Result {draft: {\"prompt\": \"kept\"}");
        assert_eq!(object.and_then(|o| o.get("prompt").cloned()), Some(Value::from("kept")));
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_json_array("").is_none());
        assert!(extract_json_array("I cannot help with that.").is_none());
        assert!(extract_json_array("[not json at all]").is_none());
        assert!(extract_json_object("{broken: ").is_none());
    }

    #[test]
    fn object_extraction_skips_prose() {
        let reply = "Result => {\"prompt\": \"refined\",} thanks";
        let object = extract_json_object(reply).unwrap_or_default();
        assert_eq!(object.get("prompt"), Some(&json!("refined")));
    }

    #[test]
    fn object_list_filters_rows_missing_keys() {
        let reply = r#"[{"prompt": "a", "shot_label": "A"}, {"shot_label": "B"}, "stray", {"prompt": " "}]"#;
        let rows = extract_object_list(reply, &["prompt"]).unwrap_or_default();
        assert_eq!(rows.len(), 1);
        assert!(extract_object_list(r#"[{"label": "x"}]"#, &["prompt"]).is_none());
    }

    #[test]
    fn plain_text_reply_is_unwrapped() {
        assert_eq!(clean_text_reply("```\n\"A slow dolly in.\"\n```"), "A slow dolly in.");
        assert_eq!(clean_text_reply("  plain  "), "plain");
    }
}

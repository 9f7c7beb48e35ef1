//! Best-effort JSON extraction from free-text model responses.
//!
//! Models wrap JSON in prose or markdown fences. We take the first balanced
//! `{...}` span that parses as an object and read fields through typed
//! accessors so each caller can apply its own defaults.

use serde_json::{Map, Value};

use crate::error::{RagError, RagResult};

/// Extract the first parseable JSON object embedded in `text`.
pub fn extract_json_object(text: &str) -> RagResult<Map<String, Value>> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    for (start, _) in cleaned.match_indices('{') {
        let Some(span) = balanced_span(&cleaned[start..]) else {
            continue;
        };
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) {
            return Ok(map);
        }
    }

    let preview: String = cleaned.chars().take(120).collect();
    Err(RagError::Parse(format!("no JSON object in response: {}", preview)))
}

/// Slice from the leading `{` to its matching `}`, skipping braces in strings.
fn balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Numeric field; numeric strings like `"7"` are accepted too.
pub fn number_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|n| n.is_finite())
}

pub fn bool_field(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    obj.get(key)?.as_bool()
}

/// Non-empty trimmed string field.
pub fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let s = obj.get(key)?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

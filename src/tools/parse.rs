//! Extract action requests from raw model text
//!
//! Models are asked to answer with `TOOL_CALL: {"name": "run_shell", "args": "..."}`,
//! but they wrap it in prose, put real newlines inside strings, or forget to escape
//! quotes in the command. Parsing is lenient and never fails loudly: anything that
//! cannot be read is treated as a plain answer.

use serde_json::Value;
use tracing::debug;

use super::action::ActionRequest;

/// Marker that introduces an action request
pub const ACTION_MARKER: &str = "TOOL_CALL:";

/// Try to parse an action request from model output
///
/// Everything after the first marker is searched for the first `{` and the last `}`;
/// the span between them is parsed as a JSON object with a `name` (or `tool_name`)
/// and an `args` (or `arguments`) field.
///
/// # Returns
/// None when there is no marker or the payload cannot be understood
pub fn parse_action_request(text: &str) -> Option<ActionRequest> {
    let (_, rest) = text.split_once(ACTION_MARKER)?;

    let start = rest.find('{');
    let end = rest.rfind('}');
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => {
            debug!("Action marker without a JSON object");
            return None;
        }
    };

    let value = parse_lenient(&rest[start..=end])?;
    request_from_value(&value)
}

/// Parse a JSON object, tolerating raw control characters and unescaped quotes in `args`
fn parse_lenient(json_str: &str) -> Option<Value> {
    let escaped = escape_control_chars(json_str);
    let strict_err = match serde_json::from_str::<Value>(&escaped) {
        Ok(value) => return Some(value),
        Err(e) => e,
    };

    // Fallback: the command itself contains unescaped double quotes
    // {"name": "run_shell", "args": "echo "hello""}
    if let Some(fixed) = repair_args_quotes(&escaped) {
        if let Ok(value) = serde_json::from_str::<Value>(&fixed) {
            return Some(value);
        }
    }

    debug!(error = %strict_err, "Could not parse action payload");
    None
}

/// Escape control characters that appear inside string literals
fn escape_control_chars(json_str: &str) -> String {
    let mut out = String::with_capacity(json_str.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in json_str.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

/// Escape bare quotes inside the `args` value when it is the last field of the object
fn repair_args_quotes(json_str: &str) -> Option<String> {
    let key_pos = ["\"args\"", "\"arguments\""]
        .iter()
        .find_map(|key| json_str.find(key).map(|pos| pos + key.len()))?;

    let after_key = &json_str[key_pos..];
    let colon = after_key.find(':')?;
    if !after_key[..colon].trim().is_empty() {
        return None;
    }
    let after_colon = &after_key[colon + 1..];
    let quote = after_colon.find('"')?;
    if !after_colon[..quote].trim().is_empty() {
        return None;
    }
    let value_start = key_pos + colon + 1 + quote + 1;

    // The value runs up to the last quote, which may only be followed by the closing brace.
    let value_end = json_str.rfind('"')?;
    if value_end < value_start || json_str[value_end + 1..].trim() != "}" {
        return None;
    }

    let mut repaired = String::with_capacity(json_str.len() + 8);
    repaired.push_str(&json_str[..value_start]);
    let mut escaped = false;
    for c in json_str[value_start..value_end].chars() {
        match c {
            _ if escaped => {
                escaped = false;
                repaired.push(c);
            }
            '\\' => {
                escaped = true;
                repaired.push(c);
            }
            '"' => repaired.push_str("\\\""),
            c => repaired.push(c),
        }
    }
    repaired.push_str(&json_str[value_end..]);
    Some(repaired)
}

/// Build a request from a parsed JSON object
fn request_from_value(value: &Value) -> Option<ActionRequest> {
    let name = value
        .get("name")
        .or_else(|| value.get("tool_name"))
        .and_then(Value::as_str)?;

    let args = value
        .get("args")
        .or_else(|| value.get("arguments"))
        .and_then(|args| match args {
            Value::String(s) => Some(s.clone()),
            // {"arguments": {"command": "ls"}}
            Value::Object(map) => map.get("command").and_then(Value::as_str).map(str::to_string),
            _ => None,
        });

    Some(ActionRequest::new(name, args))
}

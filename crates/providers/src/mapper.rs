//! Tool-Call Mapper (spec §4.2, the "hard part").
//!
//! Turns provider-native JSON tool-call shapes into canonical
//! `sa_timeline::TimelineEvent`s. Grounded on the `ClaudeEvent` parsing in
//! the prior coding-agent daemon's `ClaudeCodeRunner` for the Claude shapes,
//! generalized to Codex's four thread-item shapes per spec §4.2.

use sha2::{Digest, Sha256};
use serde_json::Value;

use sa_domain::timeline::{AgentToolCall, KeyValue, ToolCallDetail, ToolCallStatus};

/// Keys that may carry a provider's native call-correlation id, in the
/// order the spec lists them.
const CALL_ID_KEYS: &[&str] = &[
    "toolCallId",
    "tool_call_id",
    "callId",
    "call_id",
    "tool_use_id",
    "toolUseId",
];

/// Recursively search `value` for any of `CALL_ID_KEYS`. Depth-first,
/// first match wins — this gives deterministic results for (P6).
pub fn extract_call_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            for key in CALL_ID_KEYS {
                if let Some(Value::String(s)) = map.get(*key) {
                    if !s.is_empty() {
                        return Some(s.clone());
                    }
                }
            }
            for (_, v) in map {
                if let Some(found) = extract_call_id(v) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(extract_call_id),
        _ => None,
    }
}

/// Deterministic fallback callId when the provider didn't supply one (P6):
/// a function of `(provider, name, input)` only, so repeated calls with the
/// same shape collapse onto the same id. Input is sorted by serializing
/// through `serde_json::to_string` on a canonically-keyed object (serde_json
/// preserves insertion order, so callers should pass a stable-ordered Value).
pub fn deterministic_call_id(provider: &str, name: &str, input: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b"\0");
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized_json(input).as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Stable string form of a JSON value: object keys sorted recursively, so
/// equivalent inputs in different key orders hash identically.
fn normalized_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Value::Object(entries.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

/// Collapse provider-specific tool name aliases to the canonical name
/// (spec §4.2).
pub fn canonical_tool_name(raw_name: &str) -> String {
    let lower = raw_name.to_ascii_lowercase();
    match lower.as_str() {
        "bash" | "exec" | "shell" | "run_command" => "shell".into(),
        "apply_diff" | "apply_patch" | "edit" | "editfile" | "str_replace" => "edit".into(),
        "read" | "read_file" | "readfile" | "cat" => "read_file".into(),
        "web_search" | "websearch" => "web_search".into(),
        "grep" | "search" | "codebase_search" => "search".into(),
        "thinking" | "reasoning" | "think" => "thinking".into(),
        _ => lower,
    }
}

/// Turn a JSON value into `{key, value}` pairs for the `generic` detail
/// fallback (spec §4.2): object fields become one pair each, a non-object
/// value becomes a single `value` pair, `null` becomes no pairs at all.
pub fn object_to_key_values(value: &Value) -> Vec<KeyValue> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| KeyValue { key: k.clone(), value: v.clone() })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![KeyValue { key: "value".to_string(), value: other.clone() }],
    }
}

/// Strip `cwd` as a proper prefix from a file path (spec §4.2).
pub fn strip_cwd_prefix(path: &str, cwd: &str) -> String {
    if !cwd.is_empty() {
        if let Some(stripped) = path.strip_prefix(cwd) {
            let stripped = stripped.trim_start_matches('/');
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    path.to_string()
}

/// Build a canonical `AgentToolCall` from a raw provider event, given the
/// already-resolved `name`, `status`, `call_id`, and `detail`. `raw` is
/// preserved verbatim (I4/P3 leave "which raw wins" to the reducer's merge
/// logic — the mapper always attaches the event it was handed).
pub fn build_tool_call(
    provider: &str,
    server: Option<String>,
    name: &str,
    status_hint: &str,
    call_id: Option<String>,
    detail: Option<ToolCallDetail>,
    raw: Value,
) -> AgentToolCall {
    AgentToolCall {
        provider: provider.to_string(),
        server,
        tool: canonical_tool_name(name),
        status: ToolCallStatus::normalize(status_hint),
        raw,
        call_id,
        display_name: None,
        kind: None,
        detail,
        result: None,
        error: None,
    }
}

/// Extract a `{filePath|file_path|path}` field as a string, trying each key
/// in turn — the multi-naming problem spec §4.2 calls out explicitly.
pub fn extract_file_path(value: &Value) -> Option<String> {
    for key in ["filePath", "file_path", "path"] {
        if let Some(Value::String(s)) = value.get(key) {
            return Some(s.clone());
        }
    }
    None
}

/// Extract a `{command|cmd}` field as a string.
pub fn extract_command(value: &Value) -> Option<String> {
    for key in ["command", "cmd"] {
        if let Some(Value::String(s)) = value.get(key) {
            return Some(s.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn p6_extracts_known_call_id_key_from_nested_json() {
        let value = json!({
            "type": "mcp_tool_use",
            "nested": { "tool_use_id": "abc-123" }
        });
        assert_eq!(extract_call_id(&value), Some("abc-123".into()));
    }

    #[test]
    fn p6_returns_none_when_no_known_key_present() {
        let value = json!({"foo": "bar"});
        assert_eq!(extract_call_id(&value), None);
    }

    #[test]
    fn p6_deterministic_fallback_is_stable_for_same_input() {
        let input = json!({"command": "ls"});
        let a = deterministic_call_id("claude", "shell", &input);
        let b = deterministic_call_id("claude", "shell", &input);
        assert_eq!(a, b);
    }

    #[test]
    fn p6_deterministic_fallback_ignores_key_order() {
        let a = deterministic_call_id("claude", "shell", &json!({"a": 1, "b": 2}));
        let b = deterministic_call_id("claude", "shell", &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn alias_collapsing() {
        for alias in ["Bash", "bash", "exec", "shell"] {
            assert_eq!(canonical_tool_name(alias), "shell");
        }
        for alias in ["apply_diff", "apply_patch", "edit"] {
            assert_eq!(canonical_tool_name(alias), "edit");
        }
    }

    #[test]
    fn strip_cwd_prefix_removes_proper_prefix() {
        assert_eq!(strip_cwd_prefix("/home/user/proj/src/main.rs", "/home/user/proj"), "src/main.rs");
    }

    #[test]
    fn strip_cwd_prefix_leaves_unrelated_path_alone() {
        assert_eq!(strip_cwd_prefix("/etc/hosts", "/home/user/proj"), "/etc/hosts");
    }

    #[test]
    fn extract_file_path_tries_all_key_spellings() {
        assert_eq!(extract_file_path(&json!({"filePath": "a"})), Some("a".into()));
        assert_eq!(extract_file_path(&json!({"file_path": "b"})), Some("b".into()));
        assert_eq!(extract_file_path(&json!({"path": "c"})), Some("c".into()));
    }
}

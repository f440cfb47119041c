//! Wire protocol: WebSocket message envelope exchanged between clients
//! (web/mobile/CLI) and the daemon's Session Hub.
//!
//! Grounded on the `WsMessage` tagged-enum pattern the daemon already used
//! for its node protocol, generalized to the client-facing request/event
//! shapes spec.md §6 calls for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sa_domain::agent::{Agent, CreateAgentConfig, PersistenceHandle, PersistedAgentInfo};
use sa_domain::timeline::StreamItem;

/// Client → server requests. Request-style variants carry `request_id`,
/// echoed verbatim in the matching [`ServerMessage::Status`]. `Hello`,
/// `Heartbeat`, and `Ping` are fire-and-forget frames with no ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "hello")]
    Hello {
        #[serde(default)]
        client_name: Option<String>,
        #[serde(default)]
        device_type: DeviceType,
    },

    #[serde(rename = "heartbeat")]
    Heartbeat {
        device_type: DeviceType,
        #[serde(default)]
        focused_agent_id: Option<String>,
        last_activity_at: DateTime<Utc>,
        app_visible: bool,
    },

    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },

    #[serde(rename = "fetch_agents_request")]
    FetchAgentsRequest {
        request_id: String,
        #[serde(default)]
        subscribe: bool,
    },

    #[serde(rename = "git_diff_request")]
    GitDiffRequest {
        request_id: String,
        agent_id: String,
        #[serde(default)]
        path: Option<String>,
    },

    #[serde(rename = "create_agent")]
    CreateAgent {
        request_id: String,
        #[serde(flatten)]
        config: CreateAgentConfig,
    },

    #[serde(rename = "resume_agent")]
    ResumeAgent {
        request_id: String,
        handle: PersistenceHandle,
        #[serde(default)]
        mode_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        preferred_id: Option<String>,
    },

    #[serde(rename = "send_message")]
    SendMessage {
        request_id: String,
        agent_id: String,
        text: String,
        #[serde(default)]
        images: Vec<String>,
        #[serde(default)]
        client_message_id: Option<String>,
    },

    #[serde(rename = "cancel_agent")]
    CancelAgent { request_id: String, agent_id: String },

    #[serde(rename = "delete_agent")]
    DeleteAgent { request_id: String, agent_id: String },

    #[serde(rename = "subscribe")]
    Subscribe {
        request_id: String,
        #[serde(default)]
        agent_id: Option<String>,
        #[serde(default)]
        all: bool,
    },

    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        request_id: String,
        subscription_id: String,
    },

    #[serde(rename = "list_persisted_agents")]
    ListPersistedAgents {
        request_id: String,
        #[serde(default)]
        provider: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },

    #[serde(rename = "shutdown_server_request")]
    ShutdownServerRequest { request_id: String },
}

impl ClientMessage {
    /// `None` for the fire-and-forget frames (`hello`, `heartbeat`, `ping`)
    /// that have no matching [`ServerMessage::Status`] ack.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientMessage::FetchAgentsRequest { request_id, .. }
            | ClientMessage::GitDiffRequest { request_id, .. }
            | ClientMessage::CreateAgent { request_id, .. }
            | ClientMessage::ResumeAgent { request_id, .. }
            | ClientMessage::SendMessage { request_id, .. }
            | ClientMessage::CancelAgent { request_id, .. }
            | ClientMessage::DeleteAgent { request_id, .. }
            | ClientMessage::Subscribe { request_id, .. }
            | ClientMessage::Unsubscribe { request_id, .. }
            | ClientMessage::ListPersistedAgents { request_id, .. }
            | ClientMessage::ShutdownServerRequest { request_id } => Some(request_id),
            ClientMessage::Hello { .. }
            | ClientMessage::Heartbeat { .. }
            | ClientMessage::Ping { .. } => None,
        }
    }
}

/// Error payload attached to a failed [`ServerMessage::Status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }
}

/// Server → client frames. `Welcome` is always the first frame on a new
/// connection. Streaming events (`AgentState`, `AgentStream`, `AgentRemoved`,
/// `AttentionRequired`, `Lagged`) are pushed without a `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome {
        server_version: String,
        capabilities: Vec<String>,
    },

    #[serde(rename = "status")]
    Status {
        request_id: String,
        status: StatusKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },

    #[serde(rename = "agent_state")]
    AgentState { agent: Agent },

    #[serde(rename = "agent_stream")]
    AgentStream { agent_id: String, item: StreamItem },

    #[serde(rename = "agent_removed")]
    AgentRemoved { agent_id: String },

    #[serde(rename = "persisted_agents")]
    PersistedAgents {
        request_id: String,
        agents: Vec<PersistedAgentInfo>,
    },

    #[serde(rename = "attention_required")]
    AttentionRequired { agent_id: String, reason: String },

    #[serde(rename = "lagged")]
    Lagged { subscription_id: String },

    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },

    #[serde(rename = "git_diff_response")]
    GitDiffResponse {
        request_id: String,
        agent_id: String,
        diff: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Ok,
    Error,
}

impl ServerMessage {
    pub fn ok(request_id: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        ServerMessage::Status {
            request_id: request_id.into(),
            status: StatusKind::Ok,
            error: None,
            data,
        }
    }

    pub fn error(request_id: impl Into<String>, error: ErrorPayload) -> Self {
        ServerMessage::Status {
            request_id: request_id.into(),
            status: StatusKind::Error,
            error: Some(error),
            data: None,
        }
    }
}

/// Device kind reported by a client on connect; drives attention policy
/// (spec §8 — mobile clients get push-equivalent attention, CLI doesn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Web,
    Mobile,
    Cli,
    Unknown,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_round_trips_through_json() {
        let msg = ClientMessage::CancelAgent {
            request_id: "r1".into(),
            agent_id: "a1".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id(), Some("r1"));
    }

    #[test]
    fn heartbeat_has_no_request_id() {
        let msg = ClientMessage::Heartbeat {
            device_type: DeviceType::Web,
            focused_agent_id: Some("a1".into()),
            last_activity_at: Utc::now(),
            app_visible: true,
        };
        assert_eq!(msg.request_id(), None);
    }

    #[test]
    fn status_ok_serializes_lowercase() {
        let msg = ServerMessage::ok("r1", None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
    }

    #[test]
    fn error_payload_helpers_set_expected_codes() {
        assert_eq!(ErrorPayload::bad_request("x").code, "bad_request");
        assert_eq!(ErrorPayload::not_found("x").code, "not_found");
    }
}

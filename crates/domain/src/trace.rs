use serde::Serialize;

/// Structured trace events emitted across the daemon's crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    AgentCreated {
        agent_id: String,
        provider: String,
        cwd: String,
    },
    AgentStateChanged {
        agent_id: String,
        from: String,
        to: String,
    },
    AgentRemoved {
        agent_id: String,
    },
    ToolCallMapped {
        provider: String,
        tool_name: String,
        call_id: String,
        status: String,
    },
    ProviderCrashed {
        agent_id: String,
        provider: String,
        message: String,
    },
    SubscriberLagged {
        agent_id: Option<String>,
        client_id: String,
    },
    PidLockAcquired {
        listen_key: String,
        pid: u32,
    },
    PidLockStale {
        listen_key: String,
        stale_pid: u32,
    },
    RegistrySnapshotWritten {
        agent_id: String,
        updated_at: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "paseo_event");
    }
}

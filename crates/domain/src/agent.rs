//! Agent data model — the durable shape of a single coding-agent session.

use serde::{Deserialize, Serialize};

/// A backend CLI/MCP integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Claude,
    Codex,
    Opencode,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Codex => "codex",
            Provider::Opencode => "opencode",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Provider::Claude),
            "codex" => Ok(Provider::Codex),
            "opencode" => Ok(Provider::Opencode),
            other => Err(crate::error::Error::InvalidConfig(format!(
                "unknown provider \"{other}\""
            ))),
        }
    }
}

/// Agent lifecycle state. See spec §3 Lifecycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Idle,
    Running,
    Interrupting,
    Ended,
    Error,
}

impl AgentStatus {
    /// Terminal states have no further transitions (barring resume, which
    /// mints a new agent record rather than reviving this one).
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Ended | AgentStatus::Error)
    }
}

/// Opaque, provider-specific pointer letting an adapter reattach to an
/// existing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceHandle {
    pub provider: Provider,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Worktree descriptor, opaque to the core beyond bookkeeping (spec §1
/// Non-goals: worktree setup itself is a tool invocation, not modeled here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeDescriptor {
    pub name: String,
    pub path: String,
}

/// A single coding-assistant session owned by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub provider: Provider,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_handle: Option<PersistenceHandle>,
}

/// Validation regex for `worktreeName`: `^[a-z0-9](-?[a-z0-9])*$`, length <= 100.
pub fn validate_worktree_name(name: &str) -> crate::error::Result<()> {
    if name.is_empty() || name.len() > 100 {
        return Err(crate::error::Error::InvalidConfig(format!(
            "worktree name must be 1..=100 chars, got {}",
            name.len()
        )));
    }
    let mut chars = name.chars().peekable();
    let mut prev_was_hyphen = false;
    let mut first = true;
    while let Some(c) = chars.next() {
        if first {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() {
                return Err(invalid_worktree_name(name));
            }
            first = false;
            continue;
        }
        if c == '-' {
            if prev_was_hyphen {
                return Err(invalid_worktree_name(name));
            }
            prev_was_hyphen = true;
            continue;
        }
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() {
            return Err(invalid_worktree_name(name));
        }
        prev_was_hyphen = false;
    }
    if prev_was_hyphen {
        return Err(invalid_worktree_name(name));
    }
    Ok(())
}

fn invalid_worktree_name(name: &str) -> crate::error::Error {
    crate::error::Error::InvalidConfig(format!(
        "worktree name \"{name}\" must match ^[a-z0-9](-?[a-z0-9])*$"
    ))
}

/// Config accepted by `createAgent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentConfig {
    pub provider: Provider,
    pub cwd: String,
    #[serde(default)]
    pub mode_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub worktree_name: Option<String>,
}

/// A resumable-but-not-live agent record, as returned by `listPersistedAgents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAgentInfo {
    pub session_id: String,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
    pub handle: PersistenceHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worktree_name_accepts_simple_slug() {
        assert!(validate_worktree_name("feature-123").is_ok());
        assert!(validate_worktree_name("a").is_ok());
    }

    #[test]
    fn worktree_name_rejects_uppercase() {
        assert!(validate_worktree_name("Feature").is_err());
    }

    #[test]
    fn worktree_name_rejects_leading_hyphen() {
        assert!(validate_worktree_name("-feature").is_err());
    }

    #[test]
    fn worktree_name_rejects_double_hyphen() {
        assert!(validate_worktree_name("a--b").is_err());
    }

    #[test]
    fn worktree_name_rejects_trailing_hyphen() {
        assert!(validate_worktree_name("a-").is_err());
    }

    #[test]
    fn worktree_name_rejects_too_long() {
        let name = "a".repeat(101);
        assert!(validate_worktree_name(&name).is_err());
    }

    #[test]
    fn worktree_name_rejects_empty() {
        assert!(validate_worktree_name("").is_err());
    }

    #[test]
    fn provider_roundtrips_through_str() {
        for p in [Provider::Claude, Provider::Codex, Provider::Opencode] {
            let parsed: Provider = p.as_str().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn agent_status_terminal() {
        assert!(AgentStatus::Ended.is_terminal());
        assert!(AgentStatus::Error.is_terminal());
        assert!(!AgentStatus::Idle.is_terminal());
        assert!(!AgentStatus::Running.is_terminal());
    }
}

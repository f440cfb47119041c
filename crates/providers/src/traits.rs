//! The Provider Adapter contract (spec §4.2).
//!
//! Grounded on the `Runner` trait from the prior coding-agent daemon this
//! workspace descends from (`send/pause/resume/stop` over a spawned CLI
//! subprocess) rather than the chat-completion-shaped `LlmProvider` trait —
//! a coding agent session is stateful and long-lived, not a single request.

use async_trait::async_trait;
use sa_domain::agent::{PersistenceHandle, Provider};
use sa_domain::error::Result;
use tokio::sync::mpsc;

/// A single raw timeline event emitted by a provider session. `item` is the
/// provider-native JSON shape; the Tool-Call Mapper turns it into a
/// canonical `sa_timeline::TimelineEvent` before it reaches the reducer.
#[derive(Debug, Clone)]
pub struct AgentStreamEventPayload {
    pub provider: Provider,
    pub item: serde_json::Value,
}

/// Opaque handle identifying a live provider session. Adapters are free to
/// stuff whatever bookkeeping they need (child pid, native session id)
/// behind this — the Agent Manager only ever round-trips it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
}

/// A resumable-but-not-currently-live session, as surfaced by
/// `list_persisted`.
#[derive(Debug, Clone)]
pub struct PersistedSessionInfo {
    pub session_id: String,
    pub cwd: String,
    pub title: Option<String>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
    pub handle: PersistenceHandle,
}

/// Config passed to `start`.
#[derive(Debug, Clone, Default)]
pub struct StartConfig {
    pub cwd: String,
    pub mode_id: Option<String>,
    pub model: Option<String>,
    pub extra: Option<serde_json::Value>,
}

/// Config passed to `resume`, layered over the persisted handle.
#[derive(Debug, Clone, Default)]
pub struct ResumeOverrides {
    pub mode_id: Option<String>,
    pub model: Option<String>,
}

/// A provider-neutral coding-agent backend (spec §4.2). Each method that
/// hands back an event stream does so as an `mpsc::Receiver` — single
/// consumer, finite until the adapter closes it.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    async fn start(
        &self,
        config: StartConfig,
    ) -> Result<(SessionHandle, mpsc::Receiver<AgentStreamEventPayload>)>;

    async fn resume(
        &self,
        handle: PersistenceHandle,
        overrides: ResumeOverrides,
    ) -> Result<(SessionHandle, mpsc::Receiver<AgentStreamEventPayload>)>;

    async fn send(&self, session: &SessionHandle, user_message: &str) -> Result<()>;

    async fn cancel(&self, session: &SessionHandle) -> Result<()>;

    async fn close(&self, session: &SessionHandle) -> Result<()>;

    async fn list_persisted(&self, limit: Option<usize>) -> Result<Vec<PersistedSessionInfo>>;
}

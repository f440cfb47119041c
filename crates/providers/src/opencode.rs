//! OpenCode CLI adapter. Same one-shot-subprocess-per-turn shape as
//! `claude.rs`/`codex.rs`; OpenCode's `--session` flag plays the role of
//! `--resume`.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sa_domain::agent::{PersistenceHandle, Provider};
use sa_domain::error::{Error, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::subprocess::{spawn_and_pump, terminate, RunningProcess};
use crate::traits::{
    AgentStreamEventPayload, PersistedSessionInfo, ProviderAdapter, ResumeOverrides,
    SessionHandle, StartConfig,
};

struct Session {
    cwd: String,
    opencode_session_id: Mutex<Option<String>>,
    sender: mpsc::Sender<AgentStreamEventPayload>,
    process: Arc<RunningProcess>,
}

pub struct OpencodeAdapter {
    bin: String,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    persisted: Arc<Mutex<HashMap<String, PersistedSessionInfo>>>,
}

impl OpencodeAdapter {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            sessions: RwLock::new(HashMap::new()),
            persisted: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn insert_session(
        &self,
        cwd: String,
        opencode_session_id: Option<String>,
    ) -> (String, mpsc::Receiver<AgentStreamEventPayload>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(256);
        let session = Arc::new(Session {
            cwd,
            opencode_session_id: Mutex::new(opencode_session_id),
            sender: tx,
            process: RunningProcess::new(),
        });
        self.sessions.write().insert(id.clone(), session);
        (id, rx)
    }

    fn get_session(&self, handle: &SessionHandle) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("opencode session {} not found", handle.id)))
    }
}

#[async_trait]
impl ProviderAdapter for OpencodeAdapter {
    fn provider(&self) -> Provider {
        Provider::Opencode
    }

    async fn start(
        &self,
        config: StartConfig,
    ) -> Result<(SessionHandle, mpsc::Receiver<AgentStreamEventPayload>)> {
        let (id, rx) = self.insert_session(config.cwd, None);
        Ok((SessionHandle { id }, rx))
    }

    async fn resume(
        &self,
        handle: PersistenceHandle,
        _overrides: ResumeOverrides,
    ) -> Result<(SessionHandle, mpsc::Receiver<AgentStreamEventPayload>)> {
        if handle.provider != Provider::Opencode {
            return Err(Error::Provider {
                provider: "opencode".into(),
                message: format!("cannot resume a {} handle", handle.provider),
            });
        }
        let cwd = self
            .persisted
            .lock()
            .get(&handle.session_id)
            .map(|p| p.cwd.clone())
            .unwrap_or_default();
        let (id, rx) = self.insert_session(cwd, Some(handle.session_id));
        Ok((SessionHandle { id }, rx))
    }

    async fn send(&self, session: &SessionHandle, user_message: &str) -> Result<()> {
        let session_state = self.get_session(session)?;
        let bin = self.bin.clone();
        let cwd = session_state.cwd.clone();
        let resume_id = session_state.opencode_session_id.lock().clone();

        let mut args = vec!["run".to_string(), "--print-logs".to_string(), "--format".to_string(), "json".to_string()];
        if let Some(ref id) = resume_id {
            args.push("--session".to_string());
            args.push(id.clone());
        }
        args.push(user_message.to_string());

        session_state.process.cancelled.store(false, Ordering::SeqCst);

        let sender = session_state.sender.clone();
        let process = session_state.process.clone();
        let session_for_closure = session_state.clone();
        let persisted = self.persisted.clone();
        let cwd_for_closure = cwd.clone();

        spawn_and_pump(
            &bin,
            &args,
            &cwd,
            Provider::Opencode,
            sender,
            process,
            move |value| {
                if value.get("type").and_then(|t| t.as_str()) != Some("session.created") {
                    return;
                }
                let Some(sid) = value.get("session_id").and_then(|v| v.as_str()) else {
                    return;
                };
                *session_for_closure.opencode_session_id.lock() = Some(sid.to_string());
                persisted.lock().insert(
                    sid.to_string(),
                    PersistedSessionInfo {
                        session_id: sid.to_string(),
                        cwd: cwd_for_closure.clone(),
                        title: None,
                        last_activity_at: chrono::Utc::now(),
                        handle: PersistenceHandle {
                            provider: Provider::Opencode,
                            session_id: sid.to_string(),
                            native_handle: None,
                            metadata: None,
                        },
                    },
                );
            },
        )
        .await
    }

    async fn cancel(&self, session: &SessionHandle) -> Result<()> {
        let session_state = self.get_session(session)?;
        terminate(&session_state.process);
        Ok(())
    }

    async fn close(&self, session: &SessionHandle) -> Result<()> {
        if let Some(session_state) = self.sessions.write().remove(&session.id) {
            terminate(&session_state.process);
        }
        Ok(())
    }

    async fn list_persisted(&self, limit: Option<usize>) -> Result<Vec<PersistedSessionInfo>> {
        let mut sessions: Vec<_> = self.persisted.lock().values().cloned().collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_allocates_a_session_without_spawning() {
        let adapter = OpencodeAdapter::new("opencode");
        let (handle, _rx) = adapter
            .start(StartConfig {
                cwd: "/tmp".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(adapter.get_session(&handle).is_ok());
    }
}

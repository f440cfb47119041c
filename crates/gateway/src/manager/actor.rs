//! Per-agent mailbox actor: owns one [`Agent`]'s mutable state, its
//! timeline, and its live provider session, and is the only task allowed
//! to mutate any of them. Every operation the public [`AgentManager`] API
//! exposes is really "send a command into this actor's mailbox."
//!
//! Grounded on the mailbox/drain idiom in the prior daemon's
//! `runtime/agent.rs::run_agent` (register → drain a `TurnEvent` receiver →
//! unregister), generalized from a one-shot task delegation call to a
//! long-lived per-agent loop that also owns a provider-event pump.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sa_domain::agent::{Agent, AgentStatus, CreateAgentConfig, PersistenceHandle, Provider};
use sa_domain::error::Result;
use sa_protocol::ServerMessage;
use sa_providers::traits::{AgentStreamEventPayload, ResumeOverrides, SessionHandle, StartConfig};
use sa_timeline::{reduce, TimelineEvent, TimelineState};
use tokio::sync::{mpsc, oneshot};

use super::AgentManager;

/// Messages accepted by a running agent actor.
pub enum ActorCommand {
    StartProvider(CreateAgentConfig),
    ResumeProvider(PersistenceHandle, ResumeOverrides),
    SendMessage {
        text: String,
        images: Vec<String>,
        client_message_id: Option<String>,
    },
    Cancel,
    Delete(oneshot::Sender<()>),
    Shutdown,
    TurnFinished(Result<()>),
}

/// What the manager keeps about a running actor: just the mailbox. All
/// other state (timeline, session) lives inside the actor task.
pub struct ActorHandle {
    pub mailbox: mpsc::Sender<ActorCommand>,
}

pub fn spawn_actor(agent: Agent, manager: Arc<AgentManager>) -> ActorHandle {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_actor(agent, manager, rx, tx.clone()));
    ActorHandle { mailbox: tx }
}

async fn recv_provider_event(
    rx: &mut Option<mpsc::Receiver<AgentStreamEventPayload>>,
) -> Option<AgentStreamEventPayload> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_actor(
    mut agent: Agent,
    manager: Arc<AgentManager>,
    mut mailbox: mpsc::Receiver<ActorCommand>,
    self_tx: mpsc::Sender<ActorCommand>,
) {
    let mut timeline = TimelineState::new();
    let mut session: Option<SessionHandle> = None;
    let mut provider_rx: Option<mpsc::Receiver<AgentStreamEventPayload>> = None;
    let mut last_client_message_id: Option<String> = None;
    let mut wake_deadline: Option<tokio::time::Instant> = None;

    loop {
        let wake_sleep = async {
            match wake_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            cmd = mailbox.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    ActorCommand::StartProvider(config) => {
                        start_provider(&manager, &mut agent, &mut session, &mut provider_rx, config).await;
                    }
                    ActorCommand::ResumeProvider(handle, overrides) => {
                        resume_provider(&manager, &mut agent, &mut session, &mut provider_rx, handle, overrides).await;
                    }
                    ActorCommand::SendMessage { text, images, client_message_id } => {
                        if let Some(id) = &client_message_id {
                            if last_client_message_id.as_deref() == Some(id.as_str()) {
                                continue; // duplicate resend of the same turn: idempotent no-op
                            }
                            last_client_message_id = Some(id.clone());
                        }
                        wake_deadline = None;
                        send_message(&manager, &mut agent, &mut timeline, &session, &self_tx, text, images).await;
                    }
                    ActorCommand::Cancel => {
                        cancel_turn(&manager, &mut agent, &mut timeline, &session).await;
                    }
                    ActorCommand::Delete(ack) => {
                        close_provider(&manager, &agent, &session).await;
                        let _ = ack.send(());
                        break;
                    }
                    ActorCommand::Shutdown => {
                        close_provider(&manager, &agent, &session).await;
                        break;
                    }
                    ActorCommand::TurnFinished(result) => {
                        finish_turn(&manager, &mut agent, &mut timeline, result).await;
                        wake_deadline = Some(
                            tokio::time::Instant::now()
                                + Duration::from_secs(manager.config.auto_wake_window_secs),
                        );
                    }
                }
            }

            event = recv_provider_event(&mut provider_rx) => {
                match event {
                    Some(payload) => apply_provider_event(&manager, &mut agent, &mut timeline, payload).await,
                    None => provider_rx = None,
                }
            }

            _ = wake_sleep, if wake_deadline.is_some() => {
                // Autonomous wake window elapsed with no further provider
                // activity or client message; stop pumping this turn's
                // (already-closed) event stream and go fully quiet.
                wake_deadline = None;
                provider_rx = None;
            }
        }
    }
}

async fn persist_and_publish(manager: &Arc<AgentManager>, agent: &Agent) {
    if let Err(e) = manager.registry.apply_snapshot(agent.clone()) {
        tracing::warn!(agent_id = %agent.id, error = %e, "failed to persist agent snapshot");
    }
    manager.publish(&agent.id, ServerMessage::AgentState { agent: agent.clone() });
}

fn publish_latest_items(manager: &Arc<AgentManager>, agent: &Agent, timeline: &TimelineState, from: usize) {
    for item in &timeline.items()[from..] {
        manager.publish(
            &agent.id,
            ServerMessage::AgentStream { agent_id: agent.id.clone(), item: item.clone() },
        );
    }
}

async fn start_provider(
    manager: &Arc<AgentManager>,
    agent: &mut Agent,
    session: &mut Option<SessionHandle>,
    provider_rx: &mut Option<mpsc::Receiver<AgentStreamEventPayload>>,
    config: CreateAgentConfig,
) {
    let Ok(adapter) = manager.providers.get(config.provider) else {
        agent.status = AgentStatus::Error;
        persist_and_publish(manager, agent).await;
        return;
    };

    let start_config = StartConfig {
        cwd: config.cwd.clone(),
        mode_id: config.mode_id.clone(),
        model: config.model.clone(),
        extra: config.extra.clone(),
    };
    let timeout = Duration::from_secs(manager.config.startup_timeout_secs);

    match tokio::time::timeout(timeout, adapter.start(start_config)).await {
        Ok(Ok((handle, rx))) => {
            *session = Some(handle);
            *provider_rx = Some(rx);
            agent.status = AgentStatus::Idle;
        }
        Ok(Err(e)) => {
            tracing::warn!(agent_id = %agent.id, error = %e, "provider startup failed");
            agent.status = AgentStatus::Error;
        }
        Err(_) => {
            tracing::warn!(agent_id = %agent.id, "provider startup timed out");
            agent.status = AgentStatus::Error;
        }
    }
    persist_and_publish(manager, agent).await;
}

async fn resume_provider(
    manager: &Arc<AgentManager>,
    agent: &mut Agent,
    session: &mut Option<SessionHandle>,
    provider_rx: &mut Option<mpsc::Receiver<AgentStreamEventPayload>>,
    handle: PersistenceHandle,
    overrides: ResumeOverrides,
) {
    let Ok(adapter) = manager.providers.get(handle.provider) else {
        agent.status = AgentStatus::Error;
        persist_and_publish(manager, agent).await;
        return;
    };

    let session_id = handle.session_id.clone();
    let timeout = Duration::from_secs(manager.config.startup_timeout_secs);
    match tokio::time::timeout(timeout, adapter.resume(handle, overrides)).await {
        Ok(Ok((session_handle, rx))) => {
            *session = Some(session_handle);
            *provider_rx = Some(rx);
            agent.status = AgentStatus::Idle;
            if let Ok(sessions) = adapter.list_persisted(None).await {
                if let Some(info) = sessions.into_iter().find(|s| s.session_id == session_id) {
                    agent.cwd = info.cwd;
                    agent.title = agent.title.clone().or(info.title);
                }
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(agent_id = %agent.id, error = %e, "provider resume failed");
            agent.status = AgentStatus::Error;
        }
        Err(_) => {
            tracing::warn!(agent_id = %agent.id, "provider resume timed out");
            agent.status = AgentStatus::Error;
        }
    }
    persist_and_publish(manager, agent).await;
}

async fn send_message(
    manager: &Arc<AgentManager>,
    agent: &mut Agent,
    timeline: &mut TimelineState,
    session: &Option<SessionHandle>,
    self_tx: &mpsc::Sender<ActorCommand>,
    text: String,
    images: Vec<String>,
) {
    if agent.status.is_terminal() || agent.status != AgentStatus::Idle {
        return;
    }
    let Some(session) = session.clone() else { return };
    let Ok(adapter) = manager.providers.get(agent.provider) else { return };

    let before = timeline.len();
    reduce(timeline, TimelineEvent::UserMessage { id: None, text: text.clone(), images }, Utc::now());
    publish_latest_items(manager, agent, timeline, before);

    agent.status = AgentStatus::Running;
    agent.last_activity_at = Utc::now();
    persist_and_publish(manager, agent).await;

    let self_tx = self_tx.clone();
    tokio::spawn(async move {
        let result = adapter.send(&session, &text).await;
        let _ = self_tx.send(ActorCommand::TurnFinished(result)).await;
    });
}

async fn apply_provider_event(
    manager: &Arc<AgentManager>,
    agent: &mut Agent,
    timeline: &mut TimelineState,
    payload: AgentStreamEventPayload,
) {
    let before = timeline.len();
    let now = Utc::now();
    for event in sa_providers::to_timeline_events(&payload, &agent.cwd) {
        reduce(timeline, event, now);
    }
    if timeline.len() > before {
        agent.last_activity_at = now;
        publish_latest_items(manager, agent, timeline, before);
    } else {
        // Some events only mutate an already-published item in place
        // (tool-call consolidation) — republish the tail unconditionally
        // so subscribers see in-place updates too.
        if let Some(last) = timeline.items().last() {
            manager.publish(
                &agent.id,
                ServerMessage::AgentStream { agent_id: agent.id.clone(), item: last.clone() },
            );
        }
    }
}

async fn cancel_turn(
    manager: &Arc<AgentManager>,
    agent: &mut Agent,
    timeline: &mut TimelineState,
    session: &Option<SessionHandle>,
) {
    if agent.status != AgentStatus::Running {
        return; // no-op while idle, initializing, or already terminal
    }
    let Some(session) = session else { return };
    let Ok(adapter) = manager.providers.get(agent.provider) else { return };

    agent.status = AgentStatus::Interrupting;
    persist_and_publish(manager, agent).await;

    let timeout = Duration::from_secs(manager.config.cancel_timeout_secs);
    let settled = tokio::time::timeout(timeout, adapter.cancel(session)).await.is_ok();

    if !settled {
        tracing::warn!(agent_id = %agent.id, "cancel did not settle within the timeout, forcing idle");
    }
    let before = timeline.len();
    reduce(
        timeline,
        TimelineEvent::SystemNote { message: "cancelled".to_string() },
        Utc::now(),
    );
    publish_latest_items(manager, agent, timeline, before);

    agent.status = AgentStatus::Idle;
    persist_and_publish(manager, agent).await;
}

async fn close_provider(manager: &Arc<AgentManager>, agent: &Agent, session: &Option<SessionHandle>) {
    let Some(session) = session else { return };
    let Ok(adapter) = manager.providers.get(agent.provider) else { return };
    if let Err(e) = adapter.close(session).await {
        tracing::warn!(agent_id = %agent.id, error = %e, "error closing provider session");
    }
}

async fn finish_turn(manager: &Arc<AgentManager>, agent: &mut Agent, timeline: &mut TimelineState, result: Result<()>) {
    match result {
        Ok(()) => {
            agent.status = AgentStatus::Idle;
            let provider = agent.provider;
            attach_persistence_handle(manager, agent, provider).await;
        }
        Err(e) => {
            tracing::warn!(agent_id = %agent.id, error = %e, "provider crashed mid-turn");
            let before = timeline.len();
            reduce(
                timeline,
                TimelineEvent::Error { message: format!("provider error: {e}") },
                Utc::now(),
            );
            publish_latest_items(manager, agent, timeline, before);
            // Preserve the last persistence handle: a crashed provider still
            // leaves a resumable session behind (spec §7 ProviderCrash).
            agent.status = AgentStatus::Error;
        }
    }
    agent.last_activity_at = Utc::now();
    persist_and_publish(manager, agent).await;
}

/// Attach a freshly-minted persistence handle once the provider reports
/// one (surfaced indirectly via `list_persisted`, not the event stream —
/// the manager reconciles it lazily on the next snapshot write rather than
/// threading it through every event).
pub(super) async fn attach_persistence_handle(
    manager: &Arc<AgentManager>,
    agent: &mut Agent,
    provider: Provider,
) {
    if agent.persistence_handle.is_some() {
        return;
    }
    let Ok(adapter) = manager.providers.get(provider) else { return };
    if let Ok(sessions) = adapter.list_persisted(Some(1)).await {
        if let Some(info) = sessions.into_iter().find(|s| s.cwd == agent.cwd) {
            agent.persistence_handle = Some(info.handle);
        }
    }
}

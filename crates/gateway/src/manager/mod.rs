//! The Agent Manager (spec §4.1): owns every live agent's lifecycle, fronts
//! the provider adapters, and is the single writer of the Agent Registry's
//! durable snapshots.
//!
//! Grounded on `AgentManager`/`run_agent` in the prior daemon's
//! `runtime/agent.rs` for the registry-of-actors shape (a map from id to a
//! handle, `from_config`-style construction) and on `runtime/cancel.rs`'s
//! cooperative-cancellation stance — though Paseo's agents are independent
//! coding sessions rather than a parent/child delegation tree, so there's
//! no cascading cancel group here, just one actor per agent.

mod actor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sa_domain::agent::{
    Agent, AgentStatus, CreateAgentConfig, PersistedAgentInfo, PersistenceHandle,
    WorktreeDescriptor,
};
use sa_domain::config::DaemonConfig;
use sa_domain::error::{Error, Result};
use sa_protocol::ServerMessage;
use sa_providers::registry::ProviderRegistry;
use sa_providers::traits::ResumeOverrides;
use sa_registry::AgentRegistry;
use tokio::sync::{broadcast, oneshot, watch};
use uuid::Uuid;

use actor::{spawn_actor, ActorCommand, ActorHandle};

/// One event published on the manager-wide bus. `agent_id` lets a scoped
/// subscriber filter without the manager needing a channel per agent.
#[derive(Debug, Clone)]
pub struct ManagerEvent {
    pub agent_id: String,
    pub message: ServerMessage,
}

/// A live subscription. `initial` is the current snapshot(s) to replay to
/// the new subscriber before it starts consuming `events`, so there's no
/// gap between "state as of subscribe" and "next live event".
pub struct Subscription {
    pub initial: Vec<Agent>,
    pub events: broadcast::Receiver<ManagerEvent>,
}

pub struct AgentManager {
    config: Arc<DaemonConfig>,
    providers: Arc<ProviderRegistry>,
    registry: Arc<AgentRegistry>,
    actors: RwLock<HashMap<String, ActorHandle>>,
    bus: broadcast::Sender<ManagerEvent>,
    shutdown: watch::Sender<bool>,
}

impl AgentManager {
    pub fn new(
        config: Arc<DaemonConfig>,
        providers: Arc<ProviderRegistry>,
        registry: Arc<AgentRegistry>,
    ) -> Arc<Self> {
        let (bus, _rx) = broadcast::channel(config.subscription_queue_size.max(16));
        let (shutdown, _rx) = watch::channel(false);
        Arc::new(Self {
            config,
            providers,
            registry,
            actors: RwLock::new(HashMap::new()),
            bus,
            shutdown,
        })
    }

    /// Requested by `shutdown_server_request` (spec §4.4 inbound surface).
    /// `shutdown_signal` is what `main.rs` awaits to begin graceful
    /// shutdown; this just fires it. A `watch` channel (not `Notify`) so a
    /// request arriving before `main.rs` starts waiting is not lost.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Reattach an in-memory actor for every non-terminal record the
    /// registry loaded from disk, so a restarted daemon can still list and
    /// interact with agents that were running before the crash. Their
    /// provider subprocess is gone, so they come back `idle`, not
    /// `running` — the next `sendMessage` spawns a fresh one-shot turn.
    pub fn reconcile_from_registry(self: &Arc<Self>) {
        for mut agent in self.registry.list() {
            if agent.status.is_terminal() {
                continue;
            }
            if agent.status == AgentStatus::Running || agent.status == AgentStatus::Interrupting {
                agent.status = AgentStatus::Idle;
            }
            let handle = spawn_actor(agent.clone(), Arc::clone(self));
            self.actors.write().insert(agent.id.clone(), handle);
            let _ = self.registry.apply_snapshot(agent);
        }
    }

    pub async fn create_agent(self: &Arc<Self>, config: CreateAgentConfig) -> Result<String> {
        if let Some(name) = &config.worktree_name {
            sa_domain::agent::validate_worktree_name(name)?;
        }
        if !self.providers.is_available(config.provider) {
            return Err(Error::Provider {
                provider: config.provider.to_string(),
                message: "provider binary not available".into(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let agent = Agent {
            id: id.clone(),
            provider: config.provider,
            cwd: config.cwd.clone(),
            title: config.title.clone(),
            created_at: now,
            last_activity_at: now,
            status: AgentStatus::Initializing,
            mode_id: config.mode_id.clone(),
            model: config.model.clone(),
            worktree: config.worktree_name.as_ref().map(|name| WorktreeDescriptor {
                name: name.clone(),
                path: config.cwd.clone(),
            }),
            persistence_handle: None,
        };

        self.registry.apply_snapshot(agent.clone())?;
        let handle = spawn_actor(agent.clone(), Arc::clone(self));
        self.actors.write().insert(id.clone(), handle);
        self.publish(&id, ServerMessage::AgentState { agent });

        self.send_command(&id, ActorCommand::StartProvider(config)).await?;
        Ok(id)
    }

    pub async fn resume_agent(
        self: &Arc<Self>,
        handle: PersistenceHandle,
        mode_id: Option<String>,
        model: Option<String>,
        preferred_id: Option<String>,
    ) -> Result<String> {
        if !self.providers.is_available(handle.provider) {
            return Err(Error::Provider {
                provider: handle.provider.to_string(),
                message: "provider binary not available".into(),
            });
        }

        let id = preferred_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = chrono::Utc::now();
        let agent = Agent {
            id: id.clone(),
            provider: handle.provider,
            cwd: String::new(),
            title: None,
            created_at: now,
            last_activity_at: now,
            status: AgentStatus::Initializing,
            mode_id: mode_id.clone(),
            model: model.clone(),
            worktree: None,
            persistence_handle: Some(handle.clone()),
        };

        self.registry.apply_snapshot(agent.clone())?;
        let actor_handle = spawn_actor(agent.clone(), Arc::clone(self));
        self.actors.write().insert(id.clone(), actor_handle);
        self.publish(&id, ServerMessage::AgentState { agent });

        let overrides = ResumeOverrides { mode_id, model };
        self.send_command(&id, ActorCommand::ResumeProvider(handle, overrides)).await?;
        Ok(id)
    }

    pub async fn send_message(
        &self,
        agent_id: &str,
        text: String,
        images: Vec<String>,
        client_message_id: Option<String>,
    ) -> Result<()> {
        self.send_command(
            agent_id,
            ActorCommand::SendMessage { text, images, client_message_id },
        )
        .await
    }

    pub async fn cancel_agent(&self, agent_id: &str) -> Result<()> {
        self.send_command(agent_id, ActorCommand::Cancel).await
    }

    pub async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let handle = self
            .actors
            .write()
            .remove(agent_id)
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id} not found")))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        if handle.mailbox.send(ActorCommand::Delete(ack_tx)).await.is_ok() {
            let _ = tokio::time::timeout(
                Duration::from_secs(self.config.drain_timeout_secs),
                ack_rx,
            )
            .await;
        }

        self.registry.remove(agent_id)?;
        self.publish(agent_id, ServerMessage::AgentRemoved { agent_id: agent_id.to_string() });
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        self.registry.get(agent_id)
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.registry.list()
    }

    pub fn list_persisted_agents(
        &self,
        provider: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<PersistedAgentInfo> {
        self.registry
            .list_persisted(provider, limit)
            .into_iter()
            .filter_map(|agent| {
                let handle = agent.persistence_handle.clone()?;
                Some(PersistedAgentInfo {
                    session_id: handle.session_id.clone(),
                    cwd: agent.cwd,
                    title: agent.title,
                    last_activity_at: agent.last_activity_at,
                    handle,
                })
            })
            .collect()
    }

    /// Subscribe to every agent (`agent_id = None`) or just one. The
    /// initial snapshot replay plus the live bus together give the
    /// subscriber a complete, gap-free view (spec §4.1).
    pub fn subscribe(&self, agent_id: Option<&str>) -> Subscription {
        let initial = match agent_id {
            Some(id) => self.registry.get(id).into_iter().collect(),
            None => self.registry.list(),
        };
        Subscription { initial, events: self.bus.subscribe() }
    }

    /// Cancel and drain every live actor, waiting up to `drain_timeout_secs`
    /// total before returning. Called once, from the daemon's shutdown path.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.actors.write().drain().collect();
        let deadline = Duration::from_secs(self.config.drain_timeout_secs);
        let drains = handles.into_iter().map(|(id, handle)| async move {
            let (ack_tx, ack_rx) = oneshot::channel();
            if handle.mailbox.send(ActorCommand::Delete(ack_tx)).await.is_ok() {
                let _ = tokio::time::timeout(deadline, ack_rx).await;
            }
            id
        });
        futures_util::future::join_all(drains).await;
    }

    pub(crate) fn publish(&self, agent_id: &str, message: ServerMessage) {
        let _ = self.bus.send(ManagerEvent { agent_id: agent_id.to_string(), message });
    }

    async fn send_command(&self, agent_id: &str, cmd: ActorCommand) -> Result<()> {
        let mailbox = {
            self.actors
                .read()
                .get(agent_id)
                .map(|handle| handle.mailbox.clone())
        }
        .ok_or_else(|| Error::NotFound(format!("agent {agent_id} not found")))?;

        mailbox
            .send(cmd)
            .await
            .map_err(|_| Error::NotFound(format!("agent {agent_id} mailbox closed")))
    }
}

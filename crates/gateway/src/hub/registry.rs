//! Client registry: tracks every connected WebSocket client's subscription
//! scope and latest heartbeat for the Session Hub's fan-out and attention
//! policy.
//!
//! Grounded on `ConnectedNode`/`NodeRegistry` in the prior daemon's
//! `nodes/registry.rs` — same `RwLock<HashMap<id, Connected*>>` shape with a
//! `sink: mpsc::Sender<_>` per connection, `register`/`remove`/`touch`,
//! generalized from node capabilities to client subscription scope and
//! heartbeat state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use sa_protocol::{DeviceType, ServerMessage};

use super::attention::ClientHeartbeat;

pub type ClientSink = mpsc::Sender<ServerMessage>;

/// What a client's subscription covers: one agent, or every agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope {
    Agent(String),
    All,
    None,
}

impl SubscriptionScope {
    fn covers(&self, agent_id: &str) -> bool {
        match self {
            SubscriptionScope::Agent(id) => id == agent_id,
            SubscriptionScope::All => true,
            SubscriptionScope::None => false,
        }
    }
}

pub struct ConnectedClient {
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub scope: SubscriptionScope,
    pub device_type: DeviceType,
    pub focused_agent_id: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub app_visible: bool,
    pub has_heartbeat: bool,
    pub sink: ClientSink,
}

pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ConnectedClient>>,
}

impl ClientRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { clients: RwLock::new(HashMap::new()) })
    }

    pub fn register(&self, client: ConnectedClient) {
        tracing::info!(client_id = %client.client_id, "client connected");
        self.clients.write().insert(client.client_id.clone(), client);
    }

    pub fn remove(&self, client_id: &str) {
        if self.clients.write().remove(client_id).is_some() {
            tracing::info!(client_id = %client_id, "client disconnected");
        }
    }

    pub fn touch(&self, client_id: &str) {
        if let Some(client) = self.clients.write().get_mut(client_id) {
            client.last_seen = Utc::now();
        }
    }

    pub fn set_scope(&self, client_id: &str, scope: SubscriptionScope) {
        if let Some(client) = self.clients.write().get_mut(client_id) {
            client.scope = scope;
        }
    }

    /// Record a `heartbeat` frame's fields (spec §4.4): the Hub stores only
    /// the latest per connection.
    pub fn record_heartbeat(
        &self,
        client_id: &str,
        device_type: DeviceType,
        focused_agent_id: Option<String>,
        last_activity_at: DateTime<Utc>,
        app_visible: bool,
    ) {
        if let Some(client) = self.clients.write().get_mut(client_id) {
            client.device_type = device_type;
            client.focused_agent_id = focused_agent_id;
            client.last_activity_at = last_activity_at;
            client.app_visible = app_visible;
            client.has_heartbeat = true;
            client.last_seen = Utc::now();
        }
    }

    pub fn get_sink(&self, client_id: &str) -> Option<ClientSink> {
        self.clients.read().get(client_id).map(|c| c.sink.clone())
    }

    /// Every client subscribed to `agent_id` (explicit or `all`).
    pub fn subscribers_for(&self, agent_id: &str) -> Vec<(String, ClientSink)> {
        self.clients
            .read()
            .values()
            .filter(|c| c.scope.covers(agent_id))
            .map(|c| (c.client_id.clone(), c.sink.clone()))
            .collect()
    }

    /// Every connected client's sink, regardless of subscription scope —
    /// used for connection-wide frames like `agent_removed`.
    pub fn all_sinks(&self) -> Vec<(String, ClientSink)> {
        self.clients
            .read()
            .values()
            .map(|c| (c.client_id.clone(), c.sink.clone()))
            .collect()
    }

    /// Heartbeat snapshot for every client that has sent one, for the
    /// attention policy to rank against a given agent.
    pub fn heartbeats(&self) -> Vec<ClientHeartbeat> {
        self.clients
            .read()
            .values()
            .filter(|c| c.has_heartbeat)
            .map(|c| ClientHeartbeat {
                client_id: c.client_id.clone(),
                device_type: c.device_type,
                focused_agent_id: c.focused_agent_id.clone(),
                last_activity_at: c.last_activity_at,
                app_visible: c.app_visible,
            })
            .collect()
    }

    /// Client ids with no heartbeat on file yet (rule 1: safe default).
    pub fn clients_without_heartbeat(&self) -> Vec<String> {
        self.clients
            .read()
            .values()
            .filter(|c| !c.has_heartbeat)
            .map(|c| c.client_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client(id: &str, scope: SubscriptionScope) -> (ConnectedClient, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let now = Utc::now();
        (
            ConnectedClient {
                client_id: id.to_string(),
                connected_at: now,
                last_seen: now,
                scope,
                device_type: DeviceType::Unknown,
                focused_agent_id: None,
                last_activity_at: now,
                app_visible: false,
                has_heartbeat: false,
                sink: tx,
            },
            rx,
        )
    }

    #[test]
    fn subscribers_for_filters_by_scope() {
        let registry = ClientRegistry::new();
        let (c1, _r1) = make_client("c1", SubscriptionScope::Agent("a1".into()));
        let (c2, _r2) = make_client("c2", SubscriptionScope::All);
        let (c3, _r3) = make_client("c3", SubscriptionScope::Agent("a2".into()));
        registry.register(c1);
        registry.register(c2);
        registry.register(c3);

        let subs = registry.subscribers_for("a1");
        let ids: Vec<_> = subs.iter().map(|(id, _)| id.as_str()).collect();
        assert!(ids.contains(&"c1"));
        assert!(ids.contains(&"c2"));
        assert!(!ids.contains(&"c3"));
    }

    #[test]
    fn heartbeats_only_include_clients_that_reported_one() {
        let registry = ClientRegistry::new();
        let (c1, _r1) = make_client("c1", SubscriptionScope::All);
        registry.register(c1);
        assert!(registry.heartbeats().is_empty());
        assert_eq!(registry.clients_without_heartbeat(), vec!["c1".to_string()]);

        registry.record_heartbeat("c1", DeviceType::Web, Some("a1".into()), Utc::now(), true);
        assert_eq!(registry.heartbeats().len(), 1);
        assert!(registry.clients_without_heartbeat().is_empty());
    }
}

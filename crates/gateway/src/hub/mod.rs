//! Session Hub (spec §4.4): the WebSocket front door. Accepts client
//! connections, authenticates them, dispatches typed requests to the Agent
//! Manager, and fans agent events out to every interested subscriber with
//! the attention policy layered on top of turn-completion/error events.
//!
//! Grounded on the prior daemon's node-facing WebSocket plumbing
//! (`nodes/ws.rs`, `nodes/registry.rs`) — same upgrade/hello/writer-task/
//! reader-loop shape, generalized from a single node-tool-call protocol to
//! the richer multi-client request/event protocol spec.md §4.4/§6 describe.

pub mod attention;
pub mod registry;
pub mod ws;

use std::collections::HashSet;
use std::sync::Arc;

use sa_domain::agent::AgentStatus;
use sa_protocol::ServerMessage;
use tokio::sync::broadcast;

use crate::manager::{AgentManager, ManagerEvent};
use attention::should_notify;
use registry::ClientRegistry;

/// Spawn the Hub's single global fan-out loop: one subscription to the
/// Agent Manager's event bus (spec §5 O2: delivery order per `(agentId,
/// subscriber)` is preserved since this is the only reader of that bus),
/// forwarded to every client subscribed to the affected agent.
pub fn spawn_fanout(manager: Arc<AgentManager>, clients: Arc<ClientRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = manager.subscribe(None).events;
        loop {
            match events.recv().await {
                Ok(event) => dispatch(&manager, &clients, event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "hub fan-out lagged, resyncing clients");
                    resync(&manager, &clients).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn dispatch(manager: &Arc<AgentManager>, clients: &Arc<ClientRegistry>, event: ManagerEvent) {
    let agent_id = event.agent_id.clone();
    let turn_settled = matches!(
        &event.message,
        ServerMessage::AgentState { agent }
            if agent.status == AgentStatus::Idle || agent.status == AgentStatus::Error
    );

    let subscribers = clients.subscribers_for(&agent_id);
    for (_id, sink) in &subscribers {
        let _ = sink.try_send(event.message.clone());
    }

    if turn_settled {
        let subscriber_ids: HashSet<String> = subscribers.into_iter().map(|(id, _)| id).collect();
        notify_attention(clients, &agent_id, &subscriber_ids).await;
    }

    let _ = manager;
}

async fn notify_attention(clients: &Arc<ClientRegistry>, agent_id: &str, subscriber_ids: &HashSet<String>) {
    let now = chrono::Utc::now();
    let heartbeats = clients.heartbeats();
    let decisions = should_notify(&heartbeats, agent_id, now);

    let send_attention = |client_id: &str| {
        if let Some(sink) = clients.get_sink(client_id) {
            let _ = sink.try_send(ServerMessage::AttentionRequired {
                agent_id: agent_id.to_string(),
                reason: "turn_settled".to_string(),
            });
        }
    };

    for (client_id, notify) in decisions {
        if notify && subscriber_ids.contains(&client_id) {
            send_attention(&client_id);
        }
    }
    // Rule 1: clients that never sent a heartbeat default to notify.
    for client_id in clients.clients_without_heartbeat() {
        if subscriber_ids.contains(&client_id) {
            send_attention(&client_id);
        }
    }
}

async fn resync(manager: &Arc<AgentManager>, clients: &Arc<ClientRegistry>) {
    for (_id, sink) in clients.all_sinks() {
        for agent in manager.list_agents() {
            let _ = sink.try_send(ServerMessage::AgentState { agent });
        }
        let _ = sink.try_send(ServerMessage::Lagged { subscription_id: "global".to_string() });
    }
}

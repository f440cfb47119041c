//! WebSocket endpoint for client connections.
//!
//! Flow:
//! 1. Client connects to `/v1/hub/ws`, `Host` header checked against the
//!    configured allowlist before upgrade.
//! 2. Client sends `hello`; if a `PASEO_TOKEN` is configured and the
//!    `Authorization` header doesn't match, the socket is closed with 4401.
//! 3. Hub replies `welcome`.
//! 4. Bidirectional message loop: typed requests dispatched to the Agent
//!    Manager, `heartbeat`/`ping` handled inline, agent events pushed from
//!    the Hub's shared fan-out loop via this connection's sink.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use sa_domain::timeline::truncate_diff;
use sa_protocol::{ClientMessage, DeviceType, ErrorPayload, ServerMessage};

use super::registry::{ConnectedClient, SubscriptionScope};
use crate::state::AppState;

const AUTH_CLOSE_CODE: u16 = 4401;

fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

/// GET /v1/hub/ws — upgrade to WebSocket.
///
/// Host allowlist (spec §6) is checked here, before the upgrade completes —
/// an upgrade can't be un-done once accepted, so reject early with a plain
/// HTTP response rather than a WS close frame.
pub async fn hub_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !state.config.allowed_hosts.is_allowed(host) {
        return (axum::http::StatusCode::FORBIDDEN, "host not allowed").into_response();
    }

    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
        .to_string();

    ws.on_upgrade(move |socket| handle_socket(socket, state, auth_header))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, provided_token: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    if let Ok(expected) = std::env::var("PASEO_TOKEN") {
        if !token_eq(&provided_token, &expected) {
            let _ = ws_sink
                .send(Message::Close(Some(CloseFrame {
                    code: AUTH_CLOSE_CODE,
                    reason: "invalid or missing token".into(),
                })))
                .await;
            return;
        }
    }

    let client_id = uuid::Uuid::new_v4().to_string();

    if wait_for_hello(&mut ws_stream).await.is_none() {
        tracing::warn!(client_id = %client_id, "client disconnected before sending hello");
        return;
    }

    let welcome = ServerMessage::Welcome {
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: vec!["agents".into(), "persisted_agents".into(), "git_diff".into()],
    };
    if send_ws_message(&mut ws_sink, &welcome).await.is_err() {
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(
        state.config.subscription_queue_size.max(16),
    );

    let now = Utc::now();
    state.clients.register(ConnectedClient {
        client_id: client_id.clone(),
        connected_at: now,
        last_seen: now,
        scope: SubscriptionScope::None,
        device_type: DeviceType::Unknown,
        focused_agent_id: None,
        last_activity_at: now,
        app_visible: false,
        has_heartbeat: false,
        sink: outbound_tx,
    });

    tracing::info!(client_id = %client_id, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if send_ws_message(&mut ws_sink, &msg).await.is_err() {
                break;
            }
        }
    });

    let registry = state.clients.clone();
    let cid = client_id.clone();
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        registry.touch(&cid);
                        handle_inbound(&state, &cid, client_msg).await;
                    }
                    Err(e) => {
                        tracing::debug!(client_id = %cid, error = %e, "ignoring unparseable message");
                    }
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => registry.touch(&cid),
            _ => {}
        }
    }

    writer.abort();
    state.clients.remove(&client_id);
    tracing::info!(client_id = %client_id, "client disconnected");
}

struct HelloData;

async fn wait_for_hello(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<HelloData> {
    let result = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientMessage::Hello { .. }) = serde_json::from_str::<ClientMessage>(&text) {
                    return Some(HelloData);
                }
            }
        }
        None
    })
    .await;

    result.unwrap_or(None)
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &ServerMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

async fn reply(state: &AppState, client_id: &str, msg: ServerMessage) {
    if let Some(sink) = state.clients.get_sink(client_id) {
        let _ = sink.send(msg).await;
    }
}

async fn handle_inbound(state: &AppState, client_id: &str, msg: ClientMessage) {
    match msg {
        ClientMessage::Hello { .. } => {
            // Only valid as the first frame; a stray later one is ignored.
        }

        ClientMessage::Heartbeat { device_type, focused_agent_id, last_activity_at, app_visible } => {
            state.clients.record_heartbeat(client_id, device_type, focused_agent_id, last_activity_at, app_visible);
        }

        ClientMessage::Ping { timestamp } => {
            reply(state, client_id, ServerMessage::Pong { timestamp }).await;
        }

        ClientMessage::FetchAgentsRequest { request_id, subscribe } => {
            if subscribe {
                state.clients.set_scope(client_id, SubscriptionScope::All);
            }
            for agent in state.manager.list_agents() {
                reply(state, client_id, ServerMessage::AgentState { agent }).await;
            }
            reply(state, client_id, ServerMessage::ok(request_id, None)).await;
        }

        ClientMessage::Subscribe { request_id, agent_id, all } => {
            let scope = if all {
                SubscriptionScope::All
            } else if let Some(id) = &agent_id {
                SubscriptionScope::Agent(id.clone())
            } else {
                SubscriptionScope::None
            };
            state.clients.set_scope(client_id, scope);

            let snapshot = match &agent_id {
                Some(id) if !all => state.manager.get_agent(id).into_iter().collect(),
                _ => state.manager.list_agents(),
            };
            for agent in snapshot {
                reply(state, client_id, ServerMessage::AgentState { agent }).await;
            }
            reply(state, client_id, ServerMessage::ok(request_id, None)).await;
        }

        ClientMessage::Unsubscribe { request_id, .. } => {
            state.clients.set_scope(client_id, SubscriptionScope::None);
            reply(state, client_id, ServerMessage::ok(request_id, None)).await;
        }

        ClientMessage::CreateAgent { request_id, config } => {
            match state.manager.create_agent(config).await {
                Ok(agent_id) => {
                    reply(state, client_id, ServerMessage::ok(request_id, Some(serde_json::json!({ "agentId": agent_id })))).await;
                }
                Err(e) => {
                    reply(state, client_id, ServerMessage::error(request_id, ErrorPayload::bad_request(e.to_string()))).await;
                }
            }
        }

        ClientMessage::ResumeAgent { request_id, handle, mode_id, model, preferred_id } => {
            match state.manager.resume_agent(handle, mode_id, model, preferred_id).await {
                Ok(agent_id) => {
                    reply(state, client_id, ServerMessage::ok(request_id, Some(serde_json::json!({ "agentId": agent_id })))).await;
                }
                Err(e) => {
                    reply(state, client_id, ServerMessage::error(request_id, ErrorPayload::bad_request(e.to_string()))).await;
                }
            }
        }

        ClientMessage::SendMessage { request_id, agent_id, text, images, client_message_id } => {
            match state.manager.send_message(&agent_id, text, images, client_message_id).await {
                Ok(()) => reply(state, client_id, ServerMessage::ok(request_id, None)).await,
                Err(e) => reply(state, client_id, ServerMessage::error(request_id, not_found_or_bad_request(&e))).await,
            }
        }

        ClientMessage::CancelAgent { request_id, agent_id } => {
            match state.manager.cancel_agent(&agent_id).await {
                Ok(()) => reply(state, client_id, ServerMessage::ok(request_id, None)).await,
                Err(e) => reply(state, client_id, ServerMessage::error(request_id, not_found_or_bad_request(&e))).await,
            }
        }

        ClientMessage::DeleteAgent { request_id, agent_id } => {
            match state.manager.delete_agent(&agent_id).await {
                Ok(()) => reply(state, client_id, ServerMessage::ok(request_id, None)).await,
                Err(e) => reply(state, client_id, ServerMessage::error(request_id, not_found_or_bad_request(&e))).await,
            }
        }

        ClientMessage::ListPersistedAgents { request_id, provider, limit } => {
            let agents = state.manager.list_persisted_agents(provider.as_deref(), limit);
            reply(state, client_id, ServerMessage::PersistedAgents { request_id, agents }).await;
        }

        ClientMessage::GitDiffRequest { request_id, agent_id, path } => {
            let diff = match state.manager.get_agent(&agent_id) {
                Some(agent) => git_diff(&agent.cwd, path.as_deref()),
                None => {
                    reply(state, client_id, ServerMessage::error(request_id, ErrorPayload::not_found("unknown agentId"))).await;
                    return;
                }
            };
            reply(state, client_id, ServerMessage::GitDiffResponse { request_id, agent_id, diff }).await;
        }

        ClientMessage::ShutdownServerRequest { request_id } => {
            reply(state, client_id, ServerMessage::ok(request_id, None)).await;
            state.manager.request_shutdown();
        }
    }
}

fn not_found_or_bad_request(err: &sa_domain::error::Error) -> ErrorPayload {
    match err {
        sa_domain::error::Error::NotFound(msg) => ErrorPayload::not_found(msg.clone()),
        other => ErrorPayload::bad_request(other.to_string()),
    }
}

/// Best-effort `git diff` in the agent's working directory. Never fatal —
/// a missing/non-repo cwd just yields an explanatory diff body instead of
/// failing the request (same "degrade, don't fail" stance as the Tool-Call
/// Mapper).
fn git_diff(cwd: &str, path: Option<&str>) -> String {
    let mut cmd = std::process::Command::new("git");
    cmd.arg("diff").current_dir(cwd);
    if let Some(p) = path {
        cmd.arg("--").arg(p);
    }
    match cmd.output() {
        Ok(output) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout).into_owned();
            truncate_diff(&text)
        }
        Ok(output) => format!("git diff failed: {}", String::from_utf8_lossy(&output.stderr)),
        Err(e) => format!("git diff failed: {e}"),
    }
}

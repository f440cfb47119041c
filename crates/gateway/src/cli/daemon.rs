//! `paseo daemon start/stop/status` (spec §6).
//!
//! Grounded on the prior daemon's `cli/pid.rs` lock-then-run shape for
//! `start`, generalized to `sa_registry::pidlock`'s richer JSON record and
//! `listPidLocks`; `stop`/`status` are new surface the prior daemon never
//! needed (it had no multi-instance PID bookkeeping), built from spec.md
//! §6's WS-then-SIGTERM-then-SIGKILL description.

use std::path::Path;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sa_registry::pidlock::{self, PidRecord};
use tokio_tungstenite::tungstenite::Message;

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn send_signal(pid: u32, sig: i32) {
    unsafe {
        libc::kill(pid as i32, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _sig: i32) {}

pub fn status(home: &Path) -> anyhow::Result<()> {
    let records = pidlock::list_pid_locks(home);
    if records.is_empty() {
        println!("no daemons running under {}", home.display());
        return Ok(());
    }
    for r in &records {
        println!(
            "pid={} sock={} host={} started_at={}",
            r.pid, r.sock_path, r.hostname, r.started_at
        );
    }
    Ok(())
}

/// Attempt a graceful `shutdown_server_request` over WS first; on any
/// failure (connect error, no response within `timeout`), fall back to
/// SIGTERM, escalating to SIGKILL after 3s when `force` is set.
pub async fn stop(home: &Path, all: bool, force: bool, timeout_secs: u64) -> anyhow::Result<()> {
    let records = pidlock::list_pid_locks(home);
    let targets: Vec<PidRecord> = if all {
        records
    } else {
        records.into_iter().take(1).collect()
    };

    if targets.is_empty() {
        println!("no daemons running under {}", home.display());
        return Ok(());
    }

    for record in targets {
        tracing::info!(pid = record.pid, sock = %record.sock_path, "stopping daemon");

        let graceful = try_ws_shutdown(&record.sock_path, Duration::from_secs(timeout_secs)).await;
        if !graceful {
            tracing::warn!(pid = record.pid, "WS shutdown failed, sending SIGTERM");
            send_signal(record.pid, libc::SIGTERM);
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(timeout_secs);
        while process_alive(record.pid) && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        if process_alive(record.pid) {
            if force {
                tracing::warn!(pid = record.pid, "still alive after timeout, sending SIGKILL");
                send_signal(record.pid, libc::SIGKILL);
                tokio::time::sleep(Duration::from_secs(3)).await;
            } else {
                anyhow::bail!(
                    "daemon pid {} did not stop within {}s (retry with --force)",
                    record.pid,
                    timeout_secs
                );
            }
        }
    }

    Ok(())
}

/// `sock_path` here is the `host:port` the daemon listens on (the same key
/// used to derive the PID lock filename).
async fn try_ws_shutdown(listen_key: &str, timeout: Duration) -> bool {
    let url = format!("ws://{listen_key}/v1/hub/ws");
    let attempt = async {
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.ok()?;
        ws.send(Message::Text(r#"{"type":"hello"}"#.to_string())).await.ok()?;
        ws.next().await?.ok()?; // welcome
        ws.send(Message::Text(
            r#"{"type":"shutdown_server_request","request_id":"cli-stop"}"#.to_string(),
        ))
        .await
        .ok()?;
        ws.next().await?.ok()?; // status ack
        Some(())
    };
    matches!(tokio::time::timeout(timeout, attempt).await, Ok(Some(())))
}

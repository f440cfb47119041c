//! Shared subprocess-spawn/pump plumbing used by every CLI-backed provider
//! adapter. Grounded on `ClaudeCodeRunner` in the prior coding-agent
//! daemon: spawn, read stdout line-by-line as JSON, drain stderr
//! concurrently, track the child pid for pause/resume/cancel.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use sa_domain::agent::Provider;
use sa_domain::error::{Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::traits::AgentStreamEventPayload;

/// Per-turn bookkeeping shared between the spawn task and the adapter's
/// public methods (`cancel`, `close`).
pub struct RunningProcess {
    pub pid: AtomicU32,
    pub cancelled: AtomicBool,
}

impl RunningProcess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pid: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        })
    }
}

/// Spawn `bin args...` in `cwd`, stream each stdout line as a JSON value
/// through `sender`, and invoke `on_line` for every successfully parsed
/// line so the caller can pick out provider-specific bookkeeping (session
/// id, etc.) without the pump needing to understand the shape.
///
/// Malformed lines are logged and skipped — the wire is best-effort, never
/// fatal to the turn (spec §7: tool-call mapping errors fall back to
/// generic, never fatal).
pub async fn spawn_and_pump(
    bin: &str,
    args: &[String],
    cwd: &str,
    provider: Provider,
    sender: mpsc::Sender<AgentStreamEventPayload>,
    process: Arc<RunningProcess>,
    mut on_line: impl FnMut(&serde_json::Value) + Send + 'static,
) -> Result<()> {
    let mut command = Command::new(bin);
    command
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());

    let mut child = command
        .spawn()
        .map_err(|e| Error::Provider {
            provider: provider.to_string(),
            message: format!("failed to spawn {bin}: {e}"),
        })?;

    if let Some(pid) = child.id() {
        process.pid.store(pid, Ordering::SeqCst);
    }

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    tokio::spawn(async move {
        let mut stderr_lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = stderr_lines.next_line().await {
            tracing::warn!(provider = %provider, stderr = %line, "provider stderr");
        }
    });

    let mut stdout_lines = BufReader::new(stdout).lines();
    loop {
        match stdout_lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(value) => {
                        on_line(&value);
                        let payload = AgentStreamEventPayload {
                            provider,
                            item: value,
                        };
                        if sender.send(payload).await.is_err() {
                            break; // receiver dropped, nothing left to do
                        }
                    }
                    Err(e) => {
                        tracing::warn!(provider = %provider, error = %e, line = %line, "malformed provider event line, skipping");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "error reading provider stdout");
                break;
            }
        }
    }

    let status = child.wait().await;
    let cancelled = process.cancelled.load(Ordering::SeqCst);
    match status {
        Ok(exit) if !exit.success() && !cancelled => {
            tracing::warn!(provider = %provider, ?exit, "provider process exited non-zero");
        }
        Err(e) => {
            tracing::warn!(provider = %provider, error = %e, "error waiting on provider process");
        }
        _ => {}
    }

    Ok(())
}

/// Send SIGTERM to a running child (unix only — all supported providers are
/// CLI tools that only ship unix builds today).
#[cfg(unix)]
pub fn terminate(process: &RunningProcess) {
    let pid = process.pid.load(Ordering::SeqCst);
    if pid != 0 {
        process.cancelled.store(true, Ordering::SeqCst);
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
pub fn terminate(process: &RunningProcess) {
    process.cancelled.store(true, Ordering::SeqCst);
}

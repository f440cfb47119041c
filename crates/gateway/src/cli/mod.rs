//! CLI surface (spec §6): thin — the daemon does the real work, this just
//! starts/stops/inspects it.
//!
//! Grounded on the prior daemon's `cli/mod.rs` (clap derive `Parser`/
//! `Subcommand` shape, a shared `load_config` helper) and `cli/pid.rs`'s
//! "one PID file per listen address" idea, now delegated to
//! `sa_registry::pidlock` which implements the fuller spec (`§4.5`).

pub mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sa_domain::config::DaemonConfig;

/// Paseo — a coding-agent daemon fronting Claude Code, Codex, and OpenCode.
#[derive(Debug, Parser)]
#[command(name = "paseo", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the daemon detached, wait for readiness, exit non-zero on timeout.
    Onboard {
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        home: Option<PathBuf>,
        #[arg(long)]
        no_relay: bool,
        #[arg(long)]
        no_mcp: bool,
        #[arg(long = "allowed-hosts", num_args = 0..)]
        allowed_hosts: Vec<String>,
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Daemon lifecycle: start, stop, status.
    #[command(subcommand)]
    Daemon(DaemonCommand),
    /// Run the daemon in the foreground (default when no subcommand given).
    Serve {
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        home: Option<PathBuf>,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon (acquires the PID lock, then runs in foreground).
    Start {
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        home: Option<PathBuf>,
    },
    /// Stop the daemon: `shutdown_server_request` over WS, falling back to
    /// SIGTERM, then SIGKILL after 3s with `--force`.
    Stop {
        #[arg(long)]
        all: bool,
        #[arg(long)]
        force: bool,
        #[arg(long, default_value_t = 10)]
        timeout: u64,
        #[arg(long)]
        home: Option<PathBuf>,
    },
    /// Report every PID lock under `<home>/pids/`.
    Status {
        #[arg(long)]
        all: bool,
        #[arg(long)]
        home: Option<PathBuf>,
    },
}

/// Load `DaemonConfig` from `$PASEO_CONFIG` (or `<home>/config.toml`), with
/// environment overrides already applied by `DaemonConfig::load`, then layer
/// CLI-flag overrides (which win over both file and environment).
pub fn load_config(
    home_override: Option<&PathBuf>,
    listen_override: Option<&str>,
    allowed_hosts_override: &[String],
) -> anyhow::Result<DaemonConfig> {
    let config_path = std::env::var("PASEO_CONFIG").ok().map(PathBuf::from);
    let mut config = DaemonConfig::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("loading config: {e}"))?;

    if let Some(home) = home_override {
        config.home = home.clone();
    }
    if let Some(listen) = listen_override {
        if let Some((host, port)) = listen.rsplit_once(':') {
            let port: u16 = port
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid --listen port: {listen}"))?;
            config.listen.host = host.to_string();
            config.listen.port = port;
        } else {
            anyhow::bail!("--listen must be host:port, got {listen}");
        }
    }
    if !allowed_hosts_override.is_empty() {
        config.allowed_hosts = sa_domain::config::AllowedHosts::List(allowed_hosts_override.to_vec());
    }

    Ok(config)
}

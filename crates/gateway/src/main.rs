use std::sync::Arc;

use anyhow::Context;
use axum::http::Method;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use sa_domain::agent::Provider;
use sa_domain::config::{ConfigSeverity, DaemonConfig};
use sa_gateway::cli::{Cli, Command, DaemonCommand};
use sa_gateway::hub;
use sa_gateway::hub::registry::ClientRegistry;
use sa_gateway::manager::AgentManager;
use sa_gateway::state::AppState;
use sa_providers::registry::ProviderRegistry;
use sa_registry::pidlock;
use sa_registry::AgentRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve { .. }) => {
            init_tracing();
            let (listen, home) = match cli.command {
                Some(Command::Serve { listen, home }) => (listen, home),
                _ => (None, None),
            };
            let config = sa_gateway::cli::load_config(home.as_ref(), listen.as_deref(), &[])?;
            run_server(Arc::new(config)).await
        }

        Some(Command::Onboard { listen, port, home, allowed_hosts, timeout, no_relay, no_mcp }) => {
            init_tracing();
            let _ = (no_relay, no_mcp); // spec Non-goal scope for now: no relay/MCP subsystems yet to toggle.
            let listen_str = listen.or_else(|| port.map(|p| format!("127.0.0.1:{p}")));
            let config = sa_gateway::cli::load_config(home.as_ref(), listen_str.as_deref(), &allowed_hosts)?;
            onboard(Arc::new(config), timeout).await
        }

        Some(Command::Daemon(DaemonCommand::Start { listen, home })) => {
            init_tracing();
            let config = sa_gateway::cli::load_config(home.as_ref(), listen.as_deref(), &[])?;
            run_server(Arc::new(config)).await
        }

        Some(Command::Daemon(DaemonCommand::Stop { all, force, timeout, home })) => {
            let home = home.unwrap_or_else(|| DaemonConfig::default().home);
            sa_gateway::cli::daemon::stop(&home, all, force, timeout).await
        }

        Some(Command::Daemon(DaemonCommand::Status { home, .. })) => {
            let home = home.unwrap_or_else(|| DaemonConfig::default().home);
            sa_gateway::cli::daemon::status(&home)
        }

        Some(Command::Version) => {
            println!("paseo {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sa_gateway=debug")),
        )
        .json()
        .init();
}

/// `paseo onboard`: start the daemon detached and poll the PID lock file
/// until it appears (readiness), or exit non-zero on timeout.
async fn onboard(config: Arc<DaemonConfig>, timeout_secs: u64) -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("resolving current executable")?;
    let mut cmd = std::process::Command::new(exe);
    cmd.arg("daemon").arg("start");
    cmd.arg("--home").arg(&config.home);
    cmd.arg("--listen").arg(config.listen.key());
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());
    cmd.spawn().context("spawning detached daemon")?;

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);
    loop {
        let records = pidlock::list_pid_locks(&config.home);
        if records.iter().any(|r| r.sock_path == config.listen.key()) {
            println!("paseo daemon ready on {}", config.listen.key());
            return Ok(());
        }
        if std::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for daemon readiness after {timeout_secs}s");
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

async fn run_server(config: Arc<DaemonConfig>) -> anyhow::Result<()> {
    tracing::info!("paseo starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    std::fs::create_dir_all(&config.home).context("creating PASEO_HOME")?;

    let listen_key = config.listen.key();
    pidlock::migrate_legacy_pid_file(&config.home, &listen_key);

    let pid_lock = match pidlock::acquire(&config.home, &listen_key, &listen_key) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::error!(error = %e, "PID lock collision, another daemon owns this listen address");
            std::process::exit(3);
        }
    };

    let registry = Arc::new(AgentRegistry::load(&config.home).context("loading agent registry")?);
    tracing::info!(agents = registry.len(), "agent registry loaded");

    let bins = provider_bins_from_env();
    let providers = Arc::new(ProviderRegistry::from_bins(&bins));
    for err in providers.init_errors() {
        tracing::warn!(provider = %err.provider, bin = %err.bin, error = %err.error, "provider unavailable");
    }

    let manager = AgentManager::new(config.clone(), providers.clone(), registry.clone());
    manager.reconcile_from_registry();

    let clients = ClientRegistry::new();
    hub::spawn_fanout(manager.clone(), clients.clone());

    let state = AppState {
        config: config.clone(),
        providers,
        registry,
        manager: manager.clone(),
        clients,
    };

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    use tower_governor::governor::GovernorConfigBuilder;
    use tower_governor::GovernorLayer;
    let governor_config = GovernorConfigBuilder::default()
        .per_second(50)
        .burst_size(100)
        .finish()
        .expect("static governor config is always valid");

    let app = axum::Router::new()
        .route("/v1/hub/ws", get(hub::ws::hub_ws))
        .layer(cors)
        .layer(GovernorLayer { config: Arc::new(governor_config) })
        .with_state(state);

    let addr = listen_key.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "paseo listening");

    let mut shutdown_signal = manager.shutdown_signal();
    let shutdown = async move {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::select! {
            _ = ctrl_c => {}
            _ = shutdown_signal.changed() => {}
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("axum server error")?;

    tracing::info!("paseo shutting down");
    manager.shutdown().await;
    pid_lock.release();

    Ok(())
}

fn provider_bins_from_env() -> std::collections::HashMap<Provider, String> {
    let mut bins = std::collections::HashMap::new();
    if let Ok(bin) = std::env::var("PASEO_CLAUDE_BIN") {
        bins.insert(Provider::Claude, bin);
    }
    if let Ok(bin) = std::env::var("PASEO_CODEX_BIN") {
        bins.insert(Provider::Codex, bin);
    }
    if let Ok(bin) = std::env::var("PASEO_OPENCODE_BIN") {
        bins.insert(Provider::Opencode, bin);
    }
    bins
}

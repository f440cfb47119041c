//! Shared application state passed to every axum handler.
//!
//! Grounded on the prior daemon's `AppState` — same `#[derive(Clone)]` over
//! `Arc<T>` fields pattern, trimmed to the services this daemon actually
//! has: the Agent Manager, the provider registry, the durable registry, and
//! the Hub's client registry.

use std::sync::Arc;

use sa_domain::config::DaemonConfig;
use sa_providers::registry::ProviderRegistry;
use sa_registry::AgentRegistry;

use crate::hub::registry::ClientRegistry;
use crate::manager::AgentManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DaemonConfig>,
    pub providers: Arc<ProviderRegistry>,
    pub registry: Arc<AgentRegistry>,
    pub manager: Arc<AgentManager>,
    pub clients: Arc<ClientRegistry>,
}

//! Provider registry: maps each configured [`Provider`] to its
//! [`ProviderAdapter`] instance. Grounded on `ProviderRegistry::from_config`
//! in the prior coding-agent daemon, simplified — Paseo has exactly three
//! fixed providers rather than an open-ended configured list, so there are
//! no roles and no per-provider auth resolution, but the init-error
//! bookkeeping (don't let one missing CLI binary take the whole daemon
//! down) carries over directly.

use std::collections::HashMap;
use std::sync::Arc;

use sa_domain::agent::Provider;
use sa_domain::error::{Error, Result};

use crate::claude::ClaudeAdapter;
use crate::codex::CodexAdapter;
use crate::opencode::OpencodeAdapter;
use crate::traits::ProviderAdapter;

/// Which CLI binary backs each provider, and whether it was found on PATH
/// at startup.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider: Provider,
    pub bin: String,
    pub error: String,
}

pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    init_errors: Vec<ProviderInitError>,
}

fn binary_exists(bin: &str) -> bool {
    if bin.contains('/') {
        return std::path::Path::new(bin).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file())
        })
        .unwrap_or(false)
}

impl ProviderRegistry {
    /// Build the registry, checking that each provider's CLI binary is on
    /// PATH. A missing binary is recorded as an init error rather than
    /// failing startup outright — the daemon boots with whichever
    /// providers are actually available (spec: Agent Manager must not
    /// refuse to start because one provider CLI is absent).
    pub fn from_bins(bins: &HashMap<Provider, String>) -> Self {
        let mut adapters: HashMap<Provider, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut init_errors = Vec::new();

        for provider in [Provider::Claude, Provider::Codex, Provider::Opencode] {
            let bin = bins
                .get(&provider)
                .cloned()
                .unwrap_or_else(|| provider.as_str().to_string());

            if !binary_exists(&bin) {
                tracing::warn!(%provider, %bin, "provider binary not found on PATH, skipping");
                init_errors.push(ProviderInitError {
                    provider,
                    bin: bin.clone(),
                    error: format!("binary `{bin}` not found on PATH"),
                });
                continue;
            }

            let adapter: Arc<dyn ProviderAdapter> = match provider {
                Provider::Claude => Arc::new(ClaudeAdapter::new(bin.clone())),
                Provider::Codex => Arc::new(CodexAdapter::new(bin.clone())),
                Provider::Opencode => Arc::new(OpencodeAdapter::new(bin.clone())),
            };
            tracing::info!(%provider, %bin, "registered provider adapter");
            adapters.insert(provider, adapter);
        }

        Self {
            adapters,
            init_errors,
        }
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned().ok_or_else(|| Error::Provider {
            provider: provider.to_string(),
            message: "provider binary not available".into(),
        })
    }

    pub fn is_available(&self, provider: Provider) -> bool {
        self.adapters.contains_key(&provider)
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_recorded_not_fatal() {
        let mut bins = HashMap::new();
        bins.insert(Provider::Claude, "definitely-not-a-real-binary-xyz".to_string());
        let registry = ProviderRegistry::from_bins(&bins);
        assert!(!registry.is_available(Provider::Claude));
        assert_eq!(registry.init_errors().len(), 1);
    }
}

//! Daemon configuration: file + environment overrides, with validation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// `$PASEO_HOME`, default `~/.paseo`.
    #[serde(default = "d_home")]
    pub home: PathBuf,
    #[serde(default)]
    pub listen: ListenConfig,
    /// `true` disables the host allowlist entirely; otherwise a list of
    /// exact/suffix (`.example.com`) host entries.
    #[serde(default = "d_allowed_hosts")]
    pub allowed_hosts: AllowedHosts,
    /// How long the Agent Manager keeps a provider's stream pump alive
    /// after a turn goes idle, waiting for autonomous follow-up events.
    #[serde(default = "d_auto_wake_window_secs")]
    pub auto_wake_window_secs: u64,
    /// How long `shutdown()`/`deleteAgent` wait for subprocesses to drain
    /// before force-terminating.
    #[serde(default = "d_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// How long `cancelAgent` waits for the adapter to settle to `idle`.
    #[serde(default = "d_cancel_timeout_secs")]
    pub cancel_timeout_secs: u64,
    /// How long provider startup/resume may take before the agent is
    /// forced to `error`.
    #[serde(default = "d_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Bounded queue size for each subscription channel.
    #[serde(default = "d_subscription_queue_size")]
    pub subscription_queue_size: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            home: d_home(),
            listen: ListenConfig::default(),
            allowed_hosts: d_allowed_hosts(),
            auto_wake_window_secs: d_auto_wake_window_secs(),
            drain_timeout_secs: d_drain_timeout_secs(),
            cancel_timeout_secs: d_cancel_timeout_secs(),
            startup_timeout_secs: d_startup_timeout_secs(),
            subscription_queue_size: d_subscription_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

impl ListenConfig {
    /// The `host:port` key used to derive the PID lock filename.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `allowedHosts` is either `true` (disable the check) or an explicit list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowedHosts {
    Disabled(bool),
    List(Vec<String>),
}

impl AllowedHosts {
    pub fn is_allowed(&self, host: &str) -> bool {
        match self {
            AllowedHosts::Disabled(true) => true,
            AllowedHosts::Disabled(false) => false,
            AllowedHosts::List(entries) => entries.iter().any(|entry| {
                if let Some(suffix) = entry.strip_prefix('.') {
                    host.ends_with(suffix) && host.len() > suffix.len()
                } else {
                    host == entry
                }
            }),
        }
    }
}

fn d_home() -> PathBuf {
    dirs_home().join(".paseo")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_port() -> u16 {
    6767
}

fn d_allowed_hosts() -> AllowedHosts {
    AllowedHosts::List(vec!["localhost".into(), "127.0.0.1".into()])
}

fn d_auto_wake_window_secs() -> u64 {
    600
}

fn d_drain_timeout_secs() -> u64 {
    30
}

fn d_cancel_timeout_secs() -> u64 {
    10
}

fn d_startup_timeout_secs() -> u64 {
    60
}

fn d_subscription_queue_size() -> usize {
    1024
}

impl DaemonConfig {
    /// Load from a TOML file at `path`, falling back to defaults if it
    /// doesn't exist. Environment variables override file values; CLI
    /// flags (applied by the caller) override both.
    pub fn load(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw)
                    .map_err(|e| crate::error::Error::InvalidConfig(e.to_string()))?
            }
            _ => DaemonConfig::default(),
        };

        if let Ok(home) = std::env::var("PASEO_HOME") {
            config.home = PathBuf::from(home);
        }
        if let Ok(listen) = std::env::var("PASEO_LISTEN") {
            if let Some((host, port)) = listen.rsplit_once(':') {
                if let Ok(port) = port.parse() {
                    config.listen = ListenConfig {
                        host: host.to_string(),
                        port,
                    };
                }
            }
        }
        if let Ok(hosts) = std::env::var("PASEO_ALLOWED_HOSTS") {
            config.allowed_hosts =
                AllowedHosts::List(hosts.split(',').map(|s| s.trim().to_string()).collect());
        }

        Ok(config)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.listen.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "listen.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.listen.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "listen.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if let AllowedHosts::List(entries) = &self.allowed_hosts {
            if entries.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "allowed_hosts".into(),
                    message: "empty allow-list rejects every Host header; set allowedHosts = true to disable".into(),
                });
            }
        }

        if self.drain_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "drain_timeout_secs".into(),
                message: "drain_timeout_secs must be greater than 0".into(),
            });
        }

        if self.cancel_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "cancel_timeout_secs".into(),
                message: "cancel_timeout_secs must be greater than 0".into(),
            });
        }

        if self.startup_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "startup_timeout_secs".into(),
                message: "startup_timeout_secs must be greater than 0".into(),
            });
        }

        if self.subscription_queue_size == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "subscription_queue_size".into(),
                message: "subscription_queue_size must be greater than 0".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes() {
        let issues = DaemonConfig::default().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn zero_port_is_error() {
        let mut cfg = DaemonConfig::default();
        cfg.listen.port = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.field == "listen.port" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn empty_host_is_error() {
        let mut cfg = DaemonConfig::default();
        cfg.listen.host = String::new();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.field == "listen.host" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn empty_allowlist_is_warning() {
        let mut cfg = DaemonConfig::default();
        cfg.allowed_hosts = AllowedHosts::List(vec![]);
        let issues = cfg.validate();
        let issue = issues.iter().find(|e| e.field == "allowed_hosts").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn allowed_hosts_disabled_allows_anything() {
        let hosts = AllowedHosts::Disabled(true);
        assert!(hosts.is_allowed("anything.example.net"));
    }

    #[test]
    fn allowed_hosts_exact_match() {
        let hosts = AllowedHosts::List(vec!["localhost".into()]);
        assert!(hosts.is_allowed("localhost"));
        assert!(!hosts.is_allowed("evil.com"));
    }

    #[test]
    fn allowed_hosts_suffix_match() {
        let hosts = AllowedHosts::List(vec![".example.com".into()]);
        assert!(hosts.is_allowed("a.example.com"));
        assert!(!hosts.is_allowed("example.com"));
        assert!(!hosts.is_allowed("notexample.com"));
    }

    #[test]
    fn listen_key_format() {
        let listen = ListenConfig {
            host: "127.0.0.1".into(),
            port: 6767,
        };
        assert_eq!(listen.key(), "127.0.0.1:6767");
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "listen.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(
            format!("{err}"),
            "[ERROR] listen.port: port must be greater than 0"
        );
    }
}

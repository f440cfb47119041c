//! Agent Registry: durable snapshot store of agent records.
//!
//! Persists one JSON record per agent id under `<home>/registry/`. Writes
//! are write-through and serialized per record; `updatedAt` is strictly
//! monotonic per agent id (O3). Corrupted records are logged and skipped
//! rather than failing the whole load.
//!
//! Grounded on `SessionStore` in the prior coding-agent daemon — same
//! load/flush/list shape, swapped from a single `sessions.json` blob to
//! one file per record so a corrupt record can't take the rest down.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sa_domain::agent::Agent;
use sa_domain::error::{Error, Result};
use sa_domain::trace::TraceEvent;

/// One durable record in the registry. Mirrors [`Agent`] plus the
/// bookkeeping fields the store itself needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(flatten)]
    pub agent: Agent,
    pub updated_at: DateTime<Utc>,
}

/// Durable, append-safe store of [`AgentRecord`]s.
pub struct AgentRegistry {
    dir: PathBuf,
    records: RwLock<HashMap<String, AgentRecord>>,
}

fn record_path(dir: &Path, agent_id: &str) -> PathBuf {
    dir.join(format!("{agent_id}.json"))
}

impl AgentRegistry {
    /// Load (or create) the registry directory `<home>/registry/` and read
    /// every `*.json` file in it as an [`AgentRecord`]. A record that fails
    /// to parse is logged and skipped — it does not abort the load.
    pub fn load(home: &Path) -> Result<Self> {
        let dir = home.join("registry");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let mut records = HashMap::new();
        let mut corrupted = 0usize;

        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|raw| serde_json::from_str::<AgentRecord>(&raw).ok())
                {
                    Some(record) => {
                        records.insert(record.agent.id.clone(), record);
                    }
                    None => {
                        corrupted += 1;
                        tracing::warn!(path = %path.display(), "corrupted agent registry record, skipping");
                    }
                }
            }
        }

        tracing::info!(
            agents = records.len(),
            corrupted,
            path = %dir.display(),
            "agent registry loaded"
        );

        Ok(Self {
            dir,
            records: RwLock::new(records),
        })
    }

    /// Write-through upsert of a single agent snapshot. Rejects a snapshot
    /// whose `updated_at` would move the record backwards in time (O3) by
    /// silently clamping to `Utc::now()` if the caller didn't already
    /// advance it — the registry is the arbiter of monotonicity, not the
    /// caller.
    pub fn apply_snapshot(&self, agent: Agent) -> Result<()> {
        let id = agent.id.clone();
        let now = Utc::now();

        let updated_at = {
            let records = self.records.read();
            match records.get(&id) {
                Some(existing) if existing.updated_at >= now => {
                    existing.updated_at + chrono::Duration::nanoseconds(1)
                }
                _ => now,
            }
        };

        let record = AgentRecord { agent, updated_at };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| Error::Other(format!("serializing agent record: {e}")))?;
        std::fs::write(record_path(&self.dir, &id), json).map_err(Error::Io)?;

        self.records.write().insert(id.clone(), record);

        TraceEvent::RegistrySnapshotWritten {
            agent_id: id,
            updated_at: updated_at.to_rfc3339(),
        }
        .emit();

        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.records.read().get(agent_id).map(|r| r.agent.clone())
    }

    /// All known records, most-recently-updated first.
    pub fn list(&self) -> Vec<Agent> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.into_iter().map(|r| r.agent).collect()
    }

    /// Agents whose sessions are resumable but not currently live — i.e.
    /// terminal and carrying a persistence handle.
    pub fn list_persisted(&self, provider_filter: Option<&str>, limit: Option<usize>) -> Vec<Agent> {
        let mut agents: Vec<_> = self
            .list()
            .into_iter()
            .filter(|a| a.status.is_terminal() && a.persistence_handle.is_some())
            .filter(|a| {
                provider_filter
                    .map(|p| a.provider.as_str() == p)
                    .unwrap_or(true)
            })
            .collect();
        if let Some(limit) = limit {
            agents.truncate(limit);
        }
        agents
    }

    /// Remove a record from memory and disk (agent deletion).
    pub fn remove(&self, agent_id: &str) -> Result<()> {
        self.records.write().remove(agent_id);
        let path = record_path(&self.dir, agent_id);
        if path.exists() {
            std::fs::remove_file(path).map_err(Error::Io)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sa_domain::agent::{Agent, AgentStatus, PersistenceHandle, Provider};
    use tempfile::tempdir;

    fn sample_agent(id: &str, status: AgentStatus, handle: Option<PersistenceHandle>) -> Agent {
        Agent {
            id: id.to_string(),
            provider: Provider::Claude,
            cwd: "/tmp".to_string(),
            title: None,
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
            status,
            mode_id: None,
            model: None,
            worktree: None,
            persistence_handle: handle,
        }
    }

    #[test]
    fn apply_and_get_round_trips() {
        let dir = tempdir().unwrap();
        let registry = AgentRegistry::load(dir.path()).unwrap();
        let agent = sample_agent("a1", AgentStatus::Idle, None);
        registry.apply_snapshot(agent.clone()).unwrap();
        assert_eq!(registry.get("a1").unwrap().status, AgentStatus::Idle);
    }

    #[test]
    fn corrupted_record_is_skipped_on_reload() {
        let dir = tempdir().unwrap();
        let registry_dir = dir.path().join("registry");
        std::fs::create_dir_all(&registry_dir).unwrap();
        std::fs::write(registry_dir.join("broken.json"), "{ not json").unwrap();

        let registry = AgentRegistry::load(dir.path()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn list_persisted_requires_terminal_status_and_a_handle() {
        let dir = tempdir().unwrap();
        let registry = AgentRegistry::load(dir.path()).unwrap();

        let handle = PersistenceHandle {
            provider: Provider::Claude,
            session_id: "s1".into(),
            native_handle: None,
            metadata: None,
        };
        registry
            .apply_snapshot(sample_agent("ended-with-handle", AgentStatus::Ended, Some(handle.clone())))
            .unwrap();
        registry
            .apply_snapshot(sample_agent("running", AgentStatus::Running, Some(handle)))
            .unwrap();
        registry
            .apply_snapshot(sample_agent("ended-no-handle", AgentStatus::Ended, None))
            .unwrap();

        let persisted = registry.list_persisted(None, None);
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, "ended-with-handle");
    }

    #[test]
    fn remove_deletes_both_memory_and_disk_record() {
        let dir = tempdir().unwrap();
        let registry = AgentRegistry::load(dir.path()).unwrap();
        registry.apply_snapshot(sample_agent("a1", AgentStatus::Idle, None)).unwrap();
        registry.remove("a1").unwrap();
        assert!(registry.get("a1").is_none());
        assert!(!record_path(&dir.path().join("registry"), "a1").exists());
    }
}

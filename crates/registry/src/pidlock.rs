//! PID Lock: exclusive-writer gate per listen address (spec §4.5).
//!
//! Grounded on `write_pid_file`/`remove_pid_file` in the prior coding-agent
//! daemon's `cli/pid.rs` — same `fs2` exclusive-create-then-lock mechanics,
//! extended with the JSON record shape, stale-pid reclamation, and
//! `listPidLocks` the spec calls for.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use sa_domain::error::{Error, Result};
use sa_domain::trace::TraceEvent;

/// On-disk record written into `<home>/pids/<listen-key>.pid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub hostname: String,
    pub uid: u32,
    pub sock_path: String,
}

/// A live, held PID lock. The advisory `fs2` lock is released when this is
/// dropped; hold it for the daemon's lifetime.
pub struct PidLock {
    path: PathBuf,
    _file: File,
}

#[derive(Debug, thiserror::Error)]
pub enum PidLockError {
    #[error("listen address already in use by pid {pid} ({path})")]
    Held { pid: u32, path: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn sanitize_listen_key(listen_key: &str) -> String {
    listen_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn lock_path(home: &Path, listen_key: &str) -> PathBuf {
    home.join("pids").join(format!("{}.pid", sanitize_listen_key(listen_key)))
}

fn current_hostname() -> String {
    hostname_from_env().unwrap_or_else(|| "unknown".to_string())
}

fn hostname_from_env() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty())
}

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

#[cfg(unix)]
fn pid_is_running(pid: u32) -> bool {
    // signal 0 performs existence/permission checks without delivering
    // a real signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_is_running(_pid: u32) -> bool {
    true
}

fn read_record(path: &Path) -> Option<PidRecord> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_record(file: &File, record: &PidRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::Other(format!("serializing pid record: {e}")))?;
    let mut f = file;
    f.write_all(json.as_bytes()).map_err(Error::Io)?;
    f.flush().map_err(Error::Io)?;
    Ok(())
}

/// Migrate a legacy `<home>/junction.pid` file to the new per-listen-key
/// layout on first start. Best effort: failures are logged, never fatal.
pub fn migrate_legacy_pid_file(home: &Path, listen_key: &str) {
    let legacy = home.join("junction.pid");
    if !legacy.exists() {
        return;
    }
    let target = lock_path(home, listen_key);
    if target.exists() {
        return;
    }
    if let Some(parent) = target.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match fs::rename(&legacy, &target) {
        Ok(()) => tracing::info!(from = %legacy.display(), to = %target.display(), "migrated legacy junction.pid"),
        Err(e) => tracing::warn!(error = %e, "failed to migrate legacy junction.pid"),
    }
}

/// Acquire the PID lock for `listen_key` (e.g. `"127.0.0.1:6767"`).
///
/// Exclusive-create semantics: if the file already exists, read it and
/// decide based on the recorded pid — re-acquire by the same process
/// succeeds, a live foreign pid fails with [`PidLockError::Held`], and a
/// dead pid's stale lock is deleted and the acquire retried exactly once.
pub fn acquire(home: &Path, listen_key: &str, sock_path: &str) -> std::result::Result<PidLock, PidLockError> {
    let path = lock_path(home, listen_key);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    acquire_inner(&path, sock_path, true)
}

fn acquire_inner(path: &Path, sock_path: &str, allow_stale_retry: bool) -> std::result::Result<PidLock, PidLockError> {
    let my_pid = std::process::id();

    let open_result = OpenOptions::new()
        .create_new(true)
        .write(true)
        .read(true)
        .open(path);

    let file = match open_result {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if let Some(existing) = read_record(path) {
                if existing.pid == my_pid {
                    // Re-acquire by the same process: reopen and continue.
                    OpenOptions::new().write(true).read(true).open(path)?
                } else if pid_is_running(existing.pid) {
                    return Err(PidLockError::Held {
                        pid: existing.pid,
                        path: path.display().to_string(),
                    });
                } else if allow_stale_retry {
                    TraceEvent::PidLockStale {
                        listen_key: path.display().to_string(),
                        stale_pid: existing.pid,
                    }
                    .emit();
                    fs::remove_file(path)?;
                    return acquire_inner(path, sock_path, false);
                } else {
                    return Err(PidLockError::Held {
                        pid: existing.pid,
                        path: path.display().to_string(),
                    });
                }
            } else {
                // Unreadable/corrupt record: treat as stale, same bounded retry.
                if allow_stale_retry {
                    fs::remove_file(path)?;
                    return acquire_inner(path, sock_path, false);
                }
                OpenOptions::new().write(true).read(true).open(path)?
            }
        }
        Err(e) => return Err(e.into()),
    };

    file.try_lock_exclusive().map_err(|_| PidLockError::Held {
        pid: my_pid,
        path: path.display().to_string(),
    })?;

    let record = PidRecord {
        pid: my_pid,
        started_at: chrono::Utc::now(),
        hostname: current_hostname(),
        uid: current_uid(),
        sock_path: sock_path.to_string(),
    };
    write_record(&file, &record).map_err(std::io::Error::other)?;

    TraceEvent::PidLockAcquired {
        listen_key: path.display().to_string(),
        pid: my_pid,
    }
    .emit();

    Ok(PidLock {
        path: path.to_path_buf(),
        _file: file,
    })
}

impl PidLock {
    /// Release the lock: delete the file only if the recorded pid still
    /// matches the owner pid (never clobber a lock someone else took over).
    pub fn release(self) {
        if let Some(record) = read_record(&self.path) {
            if record.pid == std::process::id() {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}

/// Enumerate all PID locks under `<home>/pids/`, garbage-collecting any
/// whose owner process is no longer running.
pub fn list_pid_locks(home: &Path) -> Vec<PidRecord> {
    let dir = home.join("pids");
    let mut records = Vec::new();

    let Ok(entries) = fs::read_dir(&dir) else {
        return records;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pid") {
            continue;
        }
        match read_record(&path) {
            Some(record) if pid_is_running(record.pid) => records.push(record),
            Some(_stale) => {
                let _ = fs::remove_file(&path);
            }
            None => {
                tracing::warn!(path = %path.display(), "unreadable pid lock record, removing");
                let _ = fs::remove_file(&path);
            }
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let lock = acquire(dir.path(), "127.0.0.1:6767", "/tmp/sock").unwrap();
        lock.release();
        let lock2 = acquire(dir.path(), "127.0.0.1:6767", "/tmp/sock").unwrap();
        lock2.release();
    }

    #[test]
    fn reacquiring_by_same_process_succeeds() {
        let dir = tempdir().unwrap();
        let _lock = acquire(dir.path(), "127.0.0.1:6767", "/tmp/sock").unwrap();
        // Simulate the same process calling acquire again without releasing.
        let second = acquire(dir.path(), "127.0.0.1:6767", "/tmp/sock");
        assert!(second.is_ok());
    }

    #[test]
    fn stale_lock_from_dead_pid_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = lock_path(dir.path(), "127.0.0.1:6767");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let stale = PidRecord {
            pid: 999_999,
            started_at: chrono::Utc::now(),
            hostname: "x".into(),
            uid: 0,
            sock_path: "/tmp/sock".into(),
        };
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = acquire(dir.path(), "127.0.0.1:6767", "/tmp/sock").unwrap();
        lock.release();
    }

    #[test]
    fn list_pid_locks_garbage_collects_stale_entries() {
        let dir = tempdir().unwrap();
        let pids_dir = dir.path().join("pids");
        fs::create_dir_all(&pids_dir).unwrap();
        let stale = PidRecord {
            pid: 999_999,
            started_at: chrono::Utc::now(),
            hostname: "x".into(),
            uid: 0,
            sock_path: "/tmp/sock".into(),
        };
        fs::write(pids_dir.join("stale.pid"), serde_json::to_string(&stale).unwrap()).unwrap();

        let locks = list_pid_locks(dir.path());
        assert!(locks.is_empty());
        assert!(!pids_dir.join("stale.pid").exists());
    }

    #[test]
    fn migrate_legacy_pid_file_moves_into_new_layout() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("junction.pid"), "12345").unwrap();
        migrate_legacy_pid_file(dir.path(), "127.0.0.1:6767");
        assert!(lock_path(dir.path(), "127.0.0.1:6767").exists());
        assert!(!dir.path().join("junction.pid").exists());
    }
}

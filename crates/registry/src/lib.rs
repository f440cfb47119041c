pub mod pidlock;
pub mod store;

pub use pidlock::{acquire, list_pid_locks, migrate_legacy_pid_file, PidLock, PidLockError, PidRecord};
pub use store::{AgentRecord, AgentRegistry};

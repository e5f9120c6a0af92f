//! # storage
//!
//! why: state what raft must keep durable, without fixing how
//! relations: implemented by raft-storage (FileStorage, InMemoryStorage), driven by state.rs
//! what: Storage trait

use std::io;

use crate::config::ServerId;
use crate::log::{LogEntry, LogIndex, Term};

/// trait for durable storage of raft state
///
/// every method must have reached stable storage when it returns `Ok`;
/// `RaftPersistentState` calls them while holding its lock and before any
/// rpc response that depends on the change is produced.
pub trait Storage: Send {
    /// persist the current term and voted_for
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> io::Result<()>;

    /// load the persisted term and voted_for, `(0, None)` for a fresh server
    fn load_term_and_vote(&self) -> io::Result<(Term, Option<ServerId>)>;

    /// append entries to the end of the persisted log
    fn append_entries(&mut self, entries: &[LogEntry]) -> io::Result<()>;

    /// load all log entries (for crash recovery)
    fn load_log(&self) -> io::Result<Vec<LogEntry>>;

    /// truncate log from given index, inclusive (for conflict resolution)
    fn truncate_log_from(&mut self, from_index: LogIndex) -> io::Result<()>;
}

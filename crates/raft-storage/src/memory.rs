//! # memory storage
//!
//! why: storage for tests and simulations that still survives a server restart inside one process
//! relations: implements raft_core::Storage
//! what: InMemoryStorage

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use raft_core::{LogEntry, LogIndex, ServerId, Storage, Term};

/// in-memory storage for testing
///
/// clones share the same state, so handing a clone to a new server after the
/// old one is dropped simulates a restart with its disk intact.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    term: Term,
    voted_for: Option<ServerId>,
    log: Vec<LogEntry>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// remove all persisted state, as if the disk were wiped
    pub fn clear(&mut self) -> io::Result<()> {
        *self.inner.lock() = Inner::default();
        Ok(())
    }
}

impl Storage for InMemoryStorage {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> io::Result<()> {
        let mut inner = self.inner.lock();
        inner.term = term;
        inner.voted_for = voted_for;
        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<ServerId>)> {
        let inner = self.inner.lock();
        Ok((inner.term, inner.voted_for))
    }

    fn append_entries(&mut self, entries: &[LogEntry]) -> io::Result<()> {
        self.inner.lock().log.extend(entries.iter().cloned());
        Ok(())
    }

    fn load_log(&self) -> io::Result<Vec<LogEntry>> {
        Ok(self.inner.lock().log.clone())
    }

    fn truncate_log_from(&mut self, from_index: LogIndex) -> io::Result<()> {
        self.inner.lock().log.retain(|e| e.index < from_index);
        Ok(())
    }
}

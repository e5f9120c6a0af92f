//! # applier
//!
//! why: feed committed entries to the state machine exactly once each, in index order
//! relations: driven by follower.rs and leader.rs through RaftContext; reads state.rs, calls state_machine.rs
//! what: CommittedEntryApplier

use parking_lot::Mutex;

use crate::error::Result;
use crate::state::{RaftPersistentState, RaftVolatileState};
use crate::state_machine::StateMachine;

/// Feeds committed entries to the state machine, one at a time and in order.
///
/// The state machine lock is held for a whole batch, which makes this the single
/// writer of the applied index: each index is handed to `apply` exactly once.
pub struct CommittedEntryApplier {
    state_machine: Mutex<Box<dyn StateMachine>>,
}

impl CommittedEntryApplier {
    pub fn new(state_machine: Box<dyn StateMachine>) -> Self {
        Self {
            state_machine: Mutex::new(state_machine),
        }
    }

    /// Applies entries `applied + 1 ..= committed`; returns how many were applied.
    ///
    /// A command the state machine rejects still counts as applied; the rejection
    /// is deterministic, so every replica rejects it the same way.
    pub fn apply_committed_entries(
        &self,
        persistent: &RaftPersistentState,
        volatile: &RaftVolatileState,
    ) -> Result<usize> {
        let mut state_machine = self.state_machine.lock();
        let mut applied = 0;

        loop {
            let next = volatile.highest_applied_entry_index() + 1;
            if next > volatile.highest_committed_entry_index() {
                break;
            }
            let entry = persistent.entry_at(next)?;
            match state_machine.apply(entry.index, &entry.command) {
                Ok(_) => tracing::trace!(index = entry.index, "applied entry"),
                Err(err) => tracing::warn!(
                    index = entry.index,
                    error = %err,
                    "state machine rejected committed command"
                ),
            }
            volatile.increase_highest_applied_entry_index_to(next)?;
            applied += 1;
        }

        if applied > 0 {
            tracing::debug!(
                applied,
                last_applied = volatile.highest_applied_entry_index(),
                "applied committed entries"
            );
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use super::*;
    use crate::config::ServerId;
    use crate::error::ApplyError;
    use crate::log::{LogEntry, LogIndex, Term};
    use crate::state_machine::ApplyResult;
    use crate::storage::Storage;

    #[derive(Default)]
    struct NullStorage;

    impl Storage for NullStorage {
        fn save_term_and_vote(&mut self, _: Term, _: Option<ServerId>) -> io::Result<()> {
            Ok(())
        }
        fn load_term_and_vote(&self) -> io::Result<(Term, Option<ServerId>)> {
            Ok((0, None))
        }
        fn append_entries(&mut self, _: &[LogEntry]) -> io::Result<()> {
            Ok(())
        }
        fn load_log(&self) -> io::Result<Vec<LogEntry>> {
            Ok(Vec::new())
        }
        fn truncate_log_from(&mut self, _: LogIndex) -> io::Result<()> {
            Ok(())
        }
    }

    struct Recorder(Arc<Mutex<Vec<(LogIndex, Vec<u8>)>>>);

    impl StateMachine for Recorder {
        fn apply(&mut self, index: LogIndex, command: &[u8]) -> ApplyResult {
            self.0.lock().push((index, command.to_vec()));
            if command == b"bad" {
                return Err(ApplyError::InvalidCommand("bad".into()));
            }
            Ok(Vec::new())
        }
    }

    fn setup() -> (
        RaftPersistentState,
        RaftVolatileState,
        CommittedEntryApplier,
        Arc<Mutex<Vec<(LogIndex, Vec<u8>)>>>,
    ) {
        let persistent = RaftPersistentState::load(ServerId(1), Box::new(NullStorage)).unwrap();
        let term = persistent.increment_term_and_vote_for_self().unwrap();
        for command in [&b"a"[..], b"bad", b"c"] {
            persistent.append_command(term, command.to_vec()).unwrap();
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let applier = CommittedEntryApplier::new(Box::new(Recorder(Arc::clone(&seen))));
        (persistent, RaftVolatileState::new(), applier, seen)
    }

    #[test]
    fn applies_only_up_to_commit_index() {
        let (persistent, volatile, applier, seen) = setup();
        volatile.increase_highest_committed_entry_index_to(2).unwrap();

        assert_eq!(applier.apply_committed_entries(&persistent, &volatile).unwrap(), 2);
        assert_eq!(volatile.highest_applied_entry_index(), 2);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn each_entry_applied_once_in_order() {
        let (persistent, volatile, applier, seen) = setup();
        volatile.increase_highest_committed_entry_index_to(1).unwrap();
        applier.apply_committed_entries(&persistent, &volatile).unwrap();
        applier.apply_committed_entries(&persistent, &volatile).unwrap();
        volatile.increase_highest_committed_entry_index_to(3).unwrap();
        applier.apply_committed_entries(&persistent, &volatile).unwrap();

        let indexes: Vec<LogIndex> = seen.lock().iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[test]
    fn rejected_command_still_advances_applied_index() {
        let (persistent, volatile, applier, _seen) = setup();
        volatile.increase_highest_committed_entry_index_to(3).unwrap();
        applier.apply_committed_entries(&persistent, &volatile).unwrap();
        assert_eq!(volatile.highest_applied_entry_index(), 3);
    }
}

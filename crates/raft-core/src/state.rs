//! # state
//!
//! why: hold the raft state every mode reads and writes, with its invariants enforced in one place
//! relations: shared by all mode processors and rpc handlers; persists through storage.rs
//! what: RaftPersistentState (term, vote, log), RaftVolatileState (commit/applied index, leader)

use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config::ServerId;
use crate::error::{RaftError, Result};
use crate::log::{AppendOutcome, LogEntry, LogEntryDetails, LogIndex, RaftLog, Term};
use crate::message::RequestVoteRequest;
use crate::storage::Storage;

/// Persistent state on all servers.
///
/// Every mutator writes through to [`Storage`] while holding the internal lock,
/// so a change is durable before any caller can observe it or answer an rpc with it.
pub struct RaftPersistentState {
    this_server_id: ServerId,
    inner: Mutex<PersistentInner>,
}

struct PersistentInner {
    current_term: Term,
    voted_for: Option<ServerId>,
    /// Term in which the last vote was cast; guards "one vote per term".
    term_when_voted: Term,
    log: RaftLog,
    storage: Box<dyn Storage>,
    /// Lowest index whose persisted contents are unknown after a failed log write.
    unsynced_from: Option<LogIndex>,
}

/// Runs a blocking storage call, moving the worker's other tasks off-thread first
/// when called on a multi-threaded runtime.
fn blocking<R>(write: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(write)
        }
        _ => write(),
    }
}

impl PersistentInner {
    fn persist_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> Result<()> {
        let storage = &mut self.storage;
        blocking(|| storage.save_term_and_vote(term, voted_for))?;
        self.current_term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    /// Persist the in-memory log from `from` onwards. `persisted_len` is the log
    /// length before this change, all of which is on disk unless a write failed.
    ///
    /// On failure the in-memory log is cut back to `from - 1`, which is known to be
    /// on disk, so nothing that is not durable can be acknowledged or replicated.
    fn persist_log_from(&mut self, from: LogIndex, persisted_len: LogIndex) -> Result<()> {
        let from = self.unsynced_from.map_or(from, |unsynced| unsynced.min(from));
        let replaces_suffix = self.unsynced_from.is_some() || from <= persisted_len;
        let written = self.log.entries_from(from, usize::MAX);
        let storage = &mut self.storage;
        let result = blocking(|| {
            if replaces_suffix {
                storage.truncate_log_from(from)?;
            }
            storage.append_entries(&written)
        });

        match result {
            Ok(()) => {
                self.unsynced_from = None;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(from, error = %err, "log write failed, dropping unpersisted entries");
                self.log.truncate_after(from.saturating_sub(1));
                self.unsynced_from = Some(from);
                Err(err.into())
            }
        }
    }

    fn vote_for(&mut self, candidate_id: ServerId) -> Result<()> {
        if self.current_term <= self.term_when_voted {
            return Err(RaftError::IllegalState(format!(
                "already voted for a candidate in term {}",
                self.current_term
            )));
        }
        let term = self.current_term;
        self.persist_term_and_vote(term, Some(candidate_id))?;
        self.term_when_voted = term;
        Ok(())
    }
}

impl RaftPersistentState {
    /// Restore term, vote and log from `storage`; a fresh store yields term 0 and no vote.
    pub fn load(this_server_id: ServerId, storage: Box<dyn Storage>) -> Result<Self> {
        let (current_term, voted_for) = storage.load_term_and_vote()?;
        let log = RaftLog::from_entries(storage.load_log()?)?;
        let term_when_voted = if voted_for.is_some() { current_term } else { 0 };

        tracing::debug!(
            server_id = %this_server_id,
            term = current_term,
            voted_for = ?voted_for,
            log_length = log.len(),
            "loaded persistent state"
        );

        Ok(Self {
            this_server_id,
            inner: Mutex::new(PersistentInner {
                current_term,
                voted_for,
                term_when_voted,
                log,
                storage,
                unsynced_from: None,
            }),
        })
    }

    pub fn this_server_id(&self) -> ServerId {
        self.this_server_id
    }

    /// Latest term this server has seen.
    pub fn current_term(&self) -> Term {
        self.inner.lock().current_term
    }

    /// Candidate this server voted for in the current term, if any.
    pub fn voted_for(&self) -> Option<ServerId> {
        self.inner.lock().voted_for
    }

    /// Increments the term and votes for this server, returning the new term.
    pub fn increment_term_and_vote_for_self(&self) -> Result<Term> {
        let mut inner = self.inner.lock();
        let term = inner.current_term + 1;
        inner.persist_term_and_vote(term, Some(self.this_server_id))?;
        inner.term_when_voted = term;
        Ok(term)
    }

    /// Sets the current term and resets this server's vote.
    pub fn set_current_term_and_reset_vote(&self, new_term: Term) -> Result<()> {
        let mut inner = self.inner.lock();
        if new_term < inner.current_term {
            return Err(RaftError::InvalidArgument(format!(
                "attempting to set term [{}] lower than current term [{}]",
                new_term, inner.current_term
            )));
        }
        inner.persist_term_and_vote(new_term, None)
    }

    /// Adopts `term` if it is newer than the current one; returns whether it did.
    pub fn update_term_if_newer(&self, term: Term) -> Result<bool> {
        let mut inner = self.inner.lock();
        if term <= inner.current_term {
            return Ok(false);
        }
        inner.persist_term_and_vote(term, None)?;
        Ok(true)
    }

    /// Records a vote for `candidate_id` in the current term.
    ///
    /// Fails with `IllegalState` if a vote was already cast in this term.
    pub fn set_voted_for_candidate_id(&self, candidate_id: ServerId) -> Result<()> {
        self.inner.lock().vote_for(candidate_id)
    }

    /// Decides a RequestVote in one critical section: same term, no competing vote,
    /// and a candidate log at least as up-to-date as ours.
    pub fn grant_vote_if_eligible(&self, request: &RequestVoteRequest) -> Result<bool> {
        let mut inner = self.inner.lock();
        if request.term != inner.current_term {
            return Ok(false);
        }
        if inner.voted_for == Some(request.candidate_id) {
            return Ok(true);
        }
        if inner.current_term <= inner.term_when_voted {
            return Ok(false);
        }
        if !inner
            .log
            .is_up_to_date(request.last_log_index, request.last_log_term)
        {
            return Ok(false);
        }
        inner.vote_for(request.candidate_id)?;
        Ok(true)
    }

    pub fn last_log_entry_details(&self) -> LogEntryDetails {
        self.inner.lock().log.last_log_entry_details()
    }

    pub fn entry_at(&self, index: LogIndex) -> Result<LogEntry> {
        self.inner.lock().log.entry_at(index).cloned()
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        self.inner.lock().log.term_at(index)
    }

    pub fn entries_from(&self, start_index: LogIndex, max_entries: usize) -> Vec<LogEntry> {
        self.inner.lock().log.entries_from(start_index, max_entries)
    }

    /// Run `f` against the log under the state lock.
    pub fn with_log<R>(&self, f: impl FnOnce(&RaftLog) -> R) -> R {
        f(&self.inner.lock().log)
    }

    /// Follower path: log-matching check, conflict truncation and append, then persist the change.
    pub fn append_entries(
        &self,
        entries: &[LogEntry],
        prev_log_index: LogIndex,
        prev_log_term: Term,
    ) -> Result<AppendOutcome> {
        let mut inner = self.inner.lock();
        let persisted_len = inner.log.len();
        let outcome = inner.log.append(entries, prev_log_index, prev_log_term);
        if let AppendOutcome::Accepted {
            first_written_index: Some(first),
            ..
        } = outcome
        {
            inner.persist_log_from(first, persisted_len)?;
        }
        Ok(outcome)
    }

    /// Leader path: append `command` at the tail, tagged with `term`.
    ///
    /// Returns `None` without appending if `term` is no longer the current term.
    pub fn append_command(&self, term: Term, command: Vec<u8>) -> Result<Option<LogEntry>> {
        let mut inner = self.inner.lock();
        if inner.current_term != term {
            return Ok(None);
        }
        let entry = inner.log.append_command(term, command);
        inner.persist_log_from(entry.index, entry.index - 1)?;
        Ok(Some(entry))
    }
}

/// Volatile state that is reinitialized each time a raft server boots.
#[derive(Debug, Default)]
pub struct RaftVolatileState {
    inner: Mutex<VolatileInner>,
}

#[derive(Debug, Default)]
struct VolatileInner {
    highest_committed_entry_index: LogIndex,
    highest_applied_entry_index: LogIndex,
    leader_server_id: Option<ServerId>,
}

impl RaftVolatileState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Used to initialize state at startup.
    pub fn initialize(
        &self,
        highest_committed_entry_index: LogIndex,
        highest_applied_entry_index: LogIndex,
    ) -> Result<()> {
        self.increase_highest_committed_entry_index_to(highest_committed_entry_index)?;
        self.increase_highest_applied_entry_index_to(highest_applied_entry_index)
    }

    /// Index of highest log entry known to be committed.
    pub fn highest_committed_entry_index(&self) -> LogIndex {
        self.inner.lock().highest_committed_entry_index
    }

    /// Index of highest log entry applied to the state machine.
    pub fn highest_applied_entry_index(&self) -> LogIndex {
        self.inner.lock().highest_applied_entry_index
    }

    pub fn increase_highest_committed_entry_index_to(&self, index: LogIndex) -> Result<()> {
        let mut inner = self.inner.lock();
        if index < inner.highest_committed_entry_index {
            return Err(RaftError::InvalidArgument(format!(
                "attempting to set committed entry index [{}] lower than current value [{}]",
                index, inner.highest_committed_entry_index
            )));
        }
        if index < inner.highest_applied_entry_index {
            return Err(RaftError::InvalidArgument(format!(
                "attempting to set committed entry index [{}] lower than applied entry index [{}]",
                index, inner.highest_applied_entry_index
            )));
        }
        inner.highest_committed_entry_index = index;
        Ok(())
    }

    /// Raises the commit index to `index` when that is an increase; returns whether it moved.
    pub fn advance_highest_committed_entry_index_to(&self, index: LogIndex) -> bool {
        let mut inner = self.inner.lock();
        if index <= inner.highest_committed_entry_index {
            return false;
        }
        inner.highest_committed_entry_index = index;
        true
    }

    /// The applied index can neither decrease nor pass the committed index.
    pub fn increase_highest_applied_entry_index_to(&self, index: LogIndex) -> Result<()> {
        let mut inner = self.inner.lock();
        if index < inner.highest_applied_entry_index {
            return Err(RaftError::InvalidArgument(format!(
                "attempting to set applied entry index [{}] lower than current value [{}]",
                index, inner.highest_applied_entry_index
            )));
        }
        if index > inner.highest_committed_entry_index {
            return Err(RaftError::InvalidArgument(format!(
                "attempting to set applied entry index [{}] higher than committed entry index [{}]",
                index, inner.highest_committed_entry_index
            )));
        }
        inner.highest_applied_entry_index = index;
        Ok(())
    }

    pub fn leader_server_id(&self) -> Option<ServerId> {
        self.inner.lock().leader_server_id
    }

    pub fn set_leader_server_id(&self, leader_server_id: ServerId) {
        self.inner.lock().leader_server_id = Some(leader_server_id);
    }

    pub fn clear_leader_server_id(&self) {
        self.inner.lock().leader_server_id = None;
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Storage double that records writes and can be told to fail.
    #[derive(Default, Clone)]
    struct RecordingStorage {
        saved: Arc<Mutex<Vec<(Term, Option<ServerId>)>>>,
        log: Arc<Mutex<Vec<LogEntry>>>,
        fail: bool,
        fail_truncate: Arc<AtomicBool>,
        fail_append: Arc<AtomicBool>,
    }

    fn disk_full() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "disk full")
    }

    impl Storage for RecordingStorage {
        fn save_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> io::Result<()> {
            if self.fail {
                return Err(disk_full());
            }
            self.saved.lock().push((term, voted_for));
            Ok(())
        }

        fn load_term_and_vote(&self) -> io::Result<(Term, Option<ServerId>)> {
            Ok(self.saved.lock().last().copied().unwrap_or((0, None)))
        }

        fn append_entries(&mut self, entries: &[LogEntry]) -> io::Result<()> {
            if self.fail_append.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.log.lock().extend_from_slice(entries);
            Ok(())
        }

        fn load_log(&self) -> io::Result<Vec<LogEntry>> {
            Ok(self.log.lock().clone())
        }

        fn truncate_log_from(&mut self, from_index: LogIndex) -> io::Result<()> {
            if self.fail_truncate.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.log.lock().retain(|e| e.index < from_index);
            Ok(())
        }
    }

    fn state_with(storage: RecordingStorage) -> RaftPersistentState {
        RaftPersistentState::load(ServerId(1), Box::new(storage)).unwrap()
    }

    fn vote_request(term: Term, candidate: u64, last_index: LogIndex, last_term: Term) -> RequestVoteRequest {
        RequestVoteRequest {
            term,
            candidate_id: ServerId(candidate),
            last_log_index: last_index,
            last_log_term: last_term,
        }
    }

    #[test]
    fn fresh_state_defaults() {
        let state = state_with(RecordingStorage::default());
        assert_eq!(state.current_term(), 0);
        assert_eq!(state.voted_for(), None);
        assert_eq!(state.last_log_entry_details(), LogEntryDetails::default());
    }

    #[test]
    fn increment_term_votes_for_self_and_persists() {
        let storage = RecordingStorage::default();
        let state = state_with(storage.clone());

        assert_eq!(state.increment_term_and_vote_for_self().unwrap(), 1);
        assert_eq!(state.voted_for(), Some(ServerId(1)));
        assert_eq!(storage.saved.lock().last(), Some(&(1, Some(ServerId(1)))));
    }

    #[test]
    fn vote_once_per_term() {
        let state = state_with(RecordingStorage::default());
        state.set_current_term_and_reset_vote(3).unwrap();

        state.set_voted_for_candidate_id(ServerId(2)).unwrap();
        let second = state.set_voted_for_candidate_id(ServerId(3));

        assert!(matches!(second, Err(RaftError::IllegalState(_))));
        assert_eq!(state.voted_for(), Some(ServerId(2)));
    }

    #[test]
    fn vote_allowed_again_after_term_increase() {
        let state = state_with(RecordingStorage::default());
        state.set_current_term_and_reset_vote(1).unwrap();
        state.set_voted_for_candidate_id(ServerId(2)).unwrap();

        state.set_current_term_and_reset_vote(2).unwrap();
        assert_eq!(state.voted_for(), None);
        state.set_voted_for_candidate_id(ServerId(3)).unwrap();
        assert_eq!(state.voted_for(), Some(ServerId(3)));
    }

    #[test]
    fn resetting_vote_in_same_term_does_not_allow_second_vote() {
        let state = state_with(RecordingStorage::default());
        state.set_current_term_and_reset_vote(4).unwrap();
        state.set_voted_for_candidate_id(ServerId(2)).unwrap();

        state.set_current_term_and_reset_vote(4).unwrap();
        assert!(state.set_voted_for_candidate_id(ServerId(3)).is_err());
    }

    #[test]
    fn term_cannot_decrease() {
        let state = state_with(RecordingStorage::default());
        state.set_current_term_and_reset_vote(5).unwrap();
        assert!(matches!(
            state.set_current_term_and_reset_vote(4),
            Err(RaftError::InvalidArgument(_))
        ));
        assert_eq!(state.current_term(), 5);
    }

    #[test]
    fn failed_persist_leaves_memory_unchanged() {
        let storage = RecordingStorage {
            fail: true,
            ..Default::default()
        };
        let state = state_with(storage);

        assert!(matches!(
            state.increment_term_and_vote_for_self(),
            Err(RaftError::Storage(_))
        ));
        assert_eq!(state.current_term(), 0);
        assert_eq!(state.voted_for(), None);
    }

    #[test]
    fn grant_vote_checks_term_vote_and_log() {
        let state = state_with(RecordingStorage::default());
        state.set_current_term_and_reset_vote(2).unwrap();
        state.append_command(2, b"a".to_vec()).unwrap();

        // stale term
        assert!(!state.grant_vote_if_eligible(&vote_request(1, 2, 5, 5)).unwrap());
        // candidate log behind ours
        assert!(!state.grant_vote_if_eligible(&vote_request(2, 2, 0, 0)).unwrap());
        // eligible
        assert!(state.grant_vote_if_eligible(&vote_request(2, 2, 1, 2)).unwrap());
        // same candidate again is idempotent, another candidate is refused
        assert!(state.grant_vote_if_eligible(&vote_request(2, 2, 1, 2)).unwrap());
        assert!(!state.grant_vote_if_eligible(&vote_request(2, 3, 9, 2)).unwrap());
    }

    #[test]
    fn append_entries_persists_only_changed_suffix() {
        let storage = RecordingStorage::default();
        let state = state_with(storage.clone());
        state.set_current_term_and_reset_vote(1).unwrap();
        state.append_command(1, b"1".to_vec()).unwrap();
        state.append_command(1, b"2".to_vec()).unwrap();

        let outcome = state
            .append_entries(&[LogEntry::new(2, 2, b"x".to_vec())], 1, 1)
            .unwrap();

        assert!(outcome.is_success());
        let persisted = storage.log.lock().clone();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[1].term, 2);
    }

    #[test]
    fn load_restores_everything() {
        let storage = RecordingStorage::default();
        {
            let state = state_with(storage.clone());
            let term = state.increment_term_and_vote_for_self().unwrap();
            state.append_command(term, b"cmd".to_vec()).unwrap();
        }
        let state = state_with(storage);
        assert_eq!(state.current_term(), 1);
        assert_eq!(state.voted_for(), Some(ServerId(1)));
        assert_eq!(state.entry_at(1).unwrap().command, b"cmd".to_vec());
        // vote already cast in the restored term
        assert!(state.set_voted_for_candidate_id(ServerId(2)).is_err());
    }

    fn persisted_terms(storage: &RecordingStorage) -> Vec<Term> {
        storage.log.lock().iter().map(|e| e.term).collect()
    }

    #[test]
    fn failed_log_write_is_not_acknowledged_on_redelivery() {
        let storage = RecordingStorage::default();
        let state = state_with(storage.clone());
        state.set_current_term_and_reset_vote(1).unwrap();
        let entries = [LogEntry::new(1, 1, b"a".to_vec())];

        storage.fail_append.store(true, Ordering::SeqCst);
        assert!(matches!(
            state.append_entries(&entries, 0, 0),
            Err(RaftError::Storage(_))
        ));
        assert_eq!(state.last_log_entry_details().index, 0);

        storage.fail_append.store(false, Ordering::SeqCst);
        let outcome = state.append_entries(&entries, 0, 0).unwrap();
        assert_eq!(
            outcome,
            AppendOutcome::Accepted {
                last_new_index: 1,
                first_written_index: Some(1),
            }
        );
        assert_eq!(persisted_terms(&storage), vec![1]);
    }

    #[test]
    fn failed_conflict_replacement_is_retried_in_full() {
        let storage = RecordingStorage::default();
        let state = state_with(storage.clone());
        state.set_current_term_and_reset_vote(1).unwrap();
        state.append_command(1, b"1".to_vec()).unwrap();
        state.append_command(1, b"2".to_vec()).unwrap();
        state.set_current_term_and_reset_vote(2).unwrap();
        let replacement = [LogEntry::new(2, 2, b"x".to_vec())];

        // the stale suffix is truncated on disk, then the append fails
        storage.fail_append.store(true, Ordering::SeqCst);
        assert!(state.append_entries(&replacement, 1, 1).is_err());
        assert_eq!(state.last_log_entry_details().index, 1);
        assert_eq!(persisted_terms(&storage), vec![1]);

        storage.fail_append.store(false, Ordering::SeqCst);
        assert!(state.append_entries(&replacement, 1, 1).unwrap().is_success());
        assert_eq!(persisted_terms(&storage), vec![1, 2]);
        assert_eq!(state.term_at(2), Some(2));
    }

    #[test]
    fn failed_truncate_keeps_memory_within_disk() {
        let storage = RecordingStorage::default();
        let state = state_with(storage.clone());
        state.set_current_term_and_reset_vote(1).unwrap();
        state.append_command(1, b"1".to_vec()).unwrap();
        state.append_command(1, b"2".to_vec()).unwrap();

        storage.fail_truncate.store(true, Ordering::SeqCst);
        assert!(state
            .append_entries(&[LogEntry::new(2, 2, b"x".to_vec())], 1, 1)
            .is_err());
        assert_eq!(state.last_log_entry_details().index, 1);

        // the next write clears whatever the failed one left behind on disk
        storage.fail_truncate.store(false, Ordering::SeqCst);
        state.set_current_term_and_reset_vote(2).unwrap();
        let entry = state.append_command(2, b"y".to_vec()).unwrap().unwrap();
        assert_eq!(entry.index, 2);
        assert_eq!(persisted_terms(&storage), vec![1, 2]);
    }

    #[test]
    fn failed_leader_append_leaves_no_entry() {
        let storage = RecordingStorage::default();
        let state = state_with(storage.clone());
        state.set_current_term_and_reset_vote(3).unwrap();

        storage.fail_append.store(true, Ordering::SeqCst);
        assert!(matches!(
            state.append_command(3, b"lost".to_vec()),
            Err(RaftError::Storage(_))
        ));
        assert_eq!(state.last_log_entry_details(), LogEntryDetails::default());
        assert!(state.entries_from(1, 10).is_empty());

        storage.fail_append.store(false, Ordering::SeqCst);
        let entry = state.append_command(3, b"kept".to_vec()).unwrap().unwrap();
        assert_eq!((entry.index, entry.term), (1, 3));
        assert_eq!(persisted_terms(&storage), vec![3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn durable_writes_from_runtime_tasks() {
        let storage = RecordingStorage::default();
        let state = Arc::new(state_with(storage.clone()));

        let writer = Arc::clone(&state);
        let term = tokio::spawn(async move {
            let term = writer.increment_term_and_vote_for_self().unwrap();
            writer.append_command(term, b"a".to_vec()).unwrap();
            term
        })
        .await
        .unwrap();

        assert_eq!(state.last_log_entry_details().index, 1);
        assert_eq!(storage.saved.lock().last(), Some(&(term, Some(ServerId(1)))));
        assert_eq!(persisted_terms(&storage), vec![term]);
    }

    #[tokio::test]
    async fn durable_writes_on_current_thread_runtime() {
        let storage = RecordingStorage::default();
        let state = state_with(storage.clone());
        let term = state.increment_term_and_vote_for_self().unwrap();
        state.append_command(term, b"a".to_vec()).unwrap();
        assert_eq!(persisted_terms(&storage), vec![term]);
    }

    #[test]
    fn append_command_refuses_stale_term() {
        let state = state_with(RecordingStorage::default());
        state.set_current_term_and_reset_vote(3).unwrap();

        assert!(state.append_command(2, b"late".to_vec()).unwrap().is_none());
        let entry = state.append_command(3, b"ok".to_vec()).unwrap().unwrap();
        assert_eq!((entry.index, entry.term), (1, 3));
    }

    #[test]
    fn commit_index_cannot_regress() {
        let state = RaftVolatileState::new();
        state.increase_highest_committed_entry_index_to(5).unwrap();
        assert!(matches!(
            state.increase_highest_committed_entry_index_to(4),
            Err(RaftError::InvalidArgument(_))
        ));
        assert_eq!(state.highest_committed_entry_index(), 5);
    }

    #[test]
    fn applied_index_bounded_by_commit_index() {
        let state = RaftVolatileState::new();
        state.increase_highest_committed_entry_index_to(3).unwrap();
        assert!(state.increase_highest_applied_entry_index_to(4).is_err());
        state.increase_highest_applied_entry_index_to(3).unwrap();
        assert!(state.increase_highest_applied_entry_index_to(2).is_err());
        assert_eq!(state.highest_applied_entry_index(), 3);
    }

    #[test]
    fn advance_commit_is_a_no_op_when_not_higher() {
        let state = RaftVolatileState::new();
        assert!(state.advance_highest_committed_entry_index_to(2));
        assert!(!state.advance_highest_committed_entry_index_to(1));
        assert_eq!(state.highest_committed_entry_index(), 2);
    }

    #[test]
    fn initialize_validates_order() {
        let state = RaftVolatileState::new();
        assert!(state.initialize(2, 3).is_err());

        let state = RaftVolatileState::new();
        state.initialize(3, 2).unwrap();
        assert_eq!(state.highest_committed_entry_index(), 3);
        assert_eq!(state.highest_applied_entry_index(), 2);
    }

    #[test]
    fn leader_id_set_and_clear() {
        let state = RaftVolatileState::new();
        state.set_leader_server_id(ServerId(3));
        assert_eq!(state.leader_server_id(), Some(ServerId(3)));
        state.clear_leader_server_id();
        assert_eq!(state.leader_server_id(), None);
    }
}

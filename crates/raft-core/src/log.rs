//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: owned by state.rs (RaftPersistentState), shipped by message.rs, persisted via storage.rs
//! what: LogEntry, LogEntryDetails, RaftLog with the log-matching check and conflict truncation

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};

pub type Term = u64;
pub type LogIndex = u64;

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: Term,
    /// The index of this entry in the log (1-indexed)
    pub index: LogIndex,
    /// The command to be applied to the state machine
    pub command: Vec<u8>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: Term, index: LogIndex, command: Vec<u8>) -> Self {
        Self { term, index, command }
    }
}

/// `(index, term)` of a log position. `(0, 0)` stands for the empty log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogEntryDetails {
    pub term: Term,
    pub index: LogIndex,
}

/// Result of [`RaftLog::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// `prev_log_index` is past the end of the log or its term differs.
    Rejected,
    Accepted {
        /// Index of the last entry covered by the request.
        last_new_index: LogIndex,
        /// Lowest index whose contents changed, `None` when every entry was already present.
        first_written_index: Option<LogIndex>,
    },
}

impl AppendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AppendOutcome::Accepted { .. })
    }
}

/// Ordered entries with contiguous indices starting at 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries, checking that indices are contiguous from 1.
    pub fn from_entries(entries: Vec<LogEntry>) -> Result<Self> {
        for (position, entry) in entries.iter().enumerate() {
            let expected = position as LogIndex + 1;
            if entry.index != expected {
                return Err(RaftError::InvalidArgument(format!(
                    "persisted log has entry index {} at position {}",
                    entry.index, expected
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_log_entry_details(&self) -> LogEntryDetails {
        self.entries
            .last()
            .map(|e| LogEntryDetails {
                term: e.term,
                index: e.index,
            })
            .unwrap_or_default()
    }

    pub fn entry_at(&self, index: LogIndex) -> Result<&LogEntry> {
        if index == 0 || index > self.len() {
            return Err(RaftError::OutOfRange {
                index,
                length: self.len(),
            });
        }
        Ok(&self.entries[(index - 1) as usize])
    }

    /// Term of the entry at `index`; index 0 has term 0, past the end is `None`.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.entries.get((index - 1) as usize).map(|e| e.term)
    }

    /// Entries from `start_index` (inclusive) to the end, at most `max_entries` of them.
    pub fn entries_from(&self, start_index: LogIndex, max_entries: usize) -> Vec<LogEntry> {
        let start = start_index.max(1) as usize - 1;
        if start >= self.entries.len() {
            return Vec::new();
        }
        self.entries[start..]
            .iter()
            .take(max_entries)
            .cloned()
            .collect()
    }

    /// Append a fresh command at the tail (leader path).
    pub fn append_command(&mut self, term: Term, command: Vec<u8>) -> LogEntry {
        let entry = LogEntry::new(term, self.len() + 1, command);
        self.entries.push(entry.clone());
        entry
    }

    /// Append `new_entries` after the position `(prev_log_index, prev_log_term)`.
    ///
    /// Existing entries that agree with `new_entries` are kept, the first conflicting
    /// entry and everything after it is discarded, then the remainder is appended.
    /// Entries must carry indices `prev_log_index + 1 ..` in order.
    pub fn append(
        &mut self,
        new_entries: &[LogEntry],
        prev_log_index: LogIndex,
        prev_log_term: Term,
    ) -> AppendOutcome {
        match self.term_at(prev_log_index) {
            Some(term) if term == prev_log_term => {}
            _ => return AppendOutcome::Rejected,
        }

        for (offset, entry) in new_entries.iter().enumerate() {
            let index = prev_log_index + offset as LogIndex + 1;
            if entry.index != index {
                tracing::warn!(
                    expected = index,
                    found = entry.index,
                    "rejecting append with non-contiguous entries"
                );
                return AppendOutcome::Rejected;
            }
        }

        let mut first_written_index = None;
        for entry in new_entries {
            let index = entry.index;
            match self.term_at(index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    self.truncate_after(index - 1);
                }
                None => {}
            }
            first_written_index.get_or_insert(index);
            self.entries.push(entry.clone());
        }

        AppendOutcome::Accepted {
            last_new_index: prev_log_index + new_entries.len() as LogIndex,
            first_written_index,
        }
    }

    /// Drop every entry with an index greater than `index`.
    pub fn truncate_after(&mut self, index: LogIndex) {
        if index < self.len() {
            self.entries.truncate(index as usize);
        }
    }

    /// Candidate log `(last_log_index, last_log_term)` is at least as up-to-date as ours.
    pub fn is_up_to_date(&self, last_log_index: LogIndex, last_log_term: Term) -> bool {
        let ours = self.last_log_entry_details();
        (last_log_term, last_log_index) >= (ours.term, ours.index)
    }
}

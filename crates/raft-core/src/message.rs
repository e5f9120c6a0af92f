//! # message
//!
//! why: define the raft rpc data contracts exchanged between servers
//! relations: built by mode/ processors, carried by rpc/ channels; encoding is left to the transport
//! what: RequestVote and AppendEntries requests/responses, SubmitResults

use serde::{Deserialize, Serialize};

use crate::config::ServerId;
use crate::log::{LogEntry, LogIndex, Term};

/// Request a vote during leader election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: ServerId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// Response to a vote request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: ServerId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

impl AppendEntriesRequest {
    /// Index of the last entry this request covers.
    pub fn last_entry_index(&self) -> LogIndex {
        self.prev_log_index + self.entries.len() as LogIndex
    }
}

/// Response to AppendEntries
///
/// On success `match_index` is the last index known to match the leader.
/// On failure it is the follower's last log index, a hint for backtracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    pub match_index: LogIndex,
}

/// Outcome of submitting a client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResults {
    /// Appended to the leader's log at `index`; replication continues asynchronously.
    Success { index: LogIndex, term: Term },
    /// This server is not the leader; `leader_id` is the last known leader, if any.
    NotLeader { leader_id: Option<ServerId> },
}

impl SubmitResults {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmitResults::Success { .. })
    }
}

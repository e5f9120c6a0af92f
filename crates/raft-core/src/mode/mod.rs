//! # mode
//!
//! why: a raft server behaves as exactly one of follower, candidate or leader at a time
//! relations: manager.rs owns the active processor; state.rs, timer.rs and rpc/ are shared through RaftContext
//! what: RaftMode, RaftContext, the three processors and the shared vote rule

mod applier;
mod candidate;
mod follower;
mod leader;
mod manager;

use std::fmt;
use std::sync::Arc;

pub use applier::CommittedEntryApplier;
pub use candidate::RaftCandidateProcessor;
pub use follower::RaftFollowerProcessor;
pub use leader::RaftLeaderProcessor;
pub use manager::RaftModeManager;

use crate::config::RaftConfiguration;
use crate::error::Result;
use crate::message::{RequestVoteRequest, RequestVoteResponse};
use crate::rpc::RaftClusterRpcChannelManager;
use crate::state::{RaftPersistentState, RaftVolatileState};
use crate::timer::RaftElectionTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaftMode {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for RaftMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaftMode::Follower => write!(f, "follower"),
            RaftMode::Candidate => write!(f, "candidate"),
            RaftMode::Leader => write!(f, "leader"),
        }
    }
}

/// Everything a processor needs, shared by all of them.
pub struct RaftContext {
    pub config: RaftConfiguration,
    pub persistent: RaftPersistentState,
    pub volatile: RaftVolatileState,
    pub timer: RaftElectionTimer,
    pub channels: RaftClusterRpcChannelManager,
    pub applier: CommittedEntryApplier,
}

impl RaftContext {
    /// Number of servers, this one included.
    pub fn cluster_size(&self) -> usize {
        self.config.cluster_size()
    }

    /// Apply whatever has been committed but not yet applied.
    pub fn apply_committed_entries(&self) -> Result<usize> {
        self.applier
            .apply_committed_entries(&self.persistent, &self.volatile)
    }
}

pub(crate) type SharedContext = Arc<RaftContext>;

/// Votes are decided the same way by followers and candidates.
///
/// Callers must already have stepped down for a newer term, so a request is
/// either stale or for the current term here.
pub(crate) fn decide_vote(
    ctx: &RaftContext,
    request: &RequestVoteRequest,
) -> Result<RequestVoteResponse> {
    let current_term = ctx.persistent.current_term();
    if request.term < current_term {
        tracing::debug!(
            candidate = %request.candidate_id,
            request_term = request.term,
            current_term,
            "rejecting vote request from stale term"
        );
        return Ok(RequestVoteResponse {
            term: current_term,
            vote_granted: false,
        });
    }

    let vote_granted = ctx.persistent.grant_vote_if_eligible(request)?;
    tracing::debug!(
        candidate = %request.candidate_id,
        term = current_term,
        vote_granted,
        "vote decided"
    );
    Ok(RequestVoteResponse {
        term: ctx.persistent.current_term(),
        vote_granted,
    })
}

//! # follower
//!
//! why: accept log entries and votes from other servers while waiting for a leader
//! relations: installed by manager.rs, writes through state.rs, applies via applier.rs
//! what: RaftFollowerProcessor

use crate::error::Result;
use crate::log::AppendOutcome;
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};

use super::{decide_vote, SharedContext};

/// Passive mode: answers rpcs and waits for the election timer.
pub struct RaftFollowerProcessor {
    ctx: SharedContext,
}

impl RaftFollowerProcessor {
    pub(crate) fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }

    pub fn process_request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteResponse> {
        let response = decide_vote(&self.ctx, &request)?;
        if response.vote_granted {
            self.ctx.timer.restart();
        }
        Ok(response)
    }

    pub fn process_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let ctx = &self.ctx;
        let current_term = ctx.persistent.current_term();
        if request.term < current_term {
            tracing::debug!(
                leader = %request.leader_id,
                request_term = request.term,
                current_term,
                "rejecting append entries from stale term"
            );
            return Ok(AppendEntriesResponse {
                term: current_term,
                success: false,
                match_index: ctx.persistent.last_log_entry_details().index,
            });
        }

        ctx.timer.restart();
        ctx.volatile.set_leader_server_id(request.leader_id);

        let outcome = ctx.persistent.append_entries(
            &request.entries,
            request.prev_log_index,
            request.prev_log_term,
        )?;
        let last_new_index = match outcome {
            AppendOutcome::Rejected => {
                let last_index = ctx.persistent.last_log_entry_details().index;
                tracing::debug!(
                    prev_log_index = request.prev_log_index,
                    prev_log_term = request.prev_log_term,
                    last_index,
                    "log does not match leader"
                );
                return Ok(AppendEntriesResponse {
                    term: current_term,
                    success: false,
                    match_index: last_index,
                });
            }
            AppendOutcome::Accepted { last_new_index, .. } => last_new_index,
        };

        let commit_to = request.leader_commit.min(last_new_index);
        if ctx.volatile.advance_highest_committed_entry_index_to(commit_to) {
            tracing::trace!(commit_index = commit_to, "follower commit index advanced");
            ctx.apply_committed_entries()?;
        }

        Ok(AppendEntriesResponse {
            term: current_term,
            success: true,
            match_index: last_new_index,
        })
    }
}

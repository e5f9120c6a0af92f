//! # candidate
//!
//! why: run elections until this server wins, hears from a leader, or sees a newer term
//! relations: installed by manager.rs, collects votes through rpc/ candidate client
//! what: RaftCandidateProcessor and its election control loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{RaftError, Result};
use crate::log::Term;
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};
use crate::rpc::RequestVotesResults;

use super::{decide_vote, RaftModeManager, SharedContext};

enum ElectionOutcome {
    Won(Term),
    SteppedDown,
    /// Every peer answered or the timer fired without a majority.
    Undecided,
    Halted,
}

/// Runs elections until it wins, hears from a leader, or sees a newer term.
pub struct RaftCandidateProcessor {
    ctx: SharedContext,
    manager: Weak<RaftModeManager>,
    stop: CancellationToken,
    election_timeout_occurred: AtomicBool,
    election_timeout: Notify,
}

impl RaftCandidateProcessor {
    pub(crate) fn new(
        ctx: SharedContext,
        manager: Weak<RaftModeManager>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            manager,
            stop,
            election_timeout_occurred: AtomicBool::new(false),
            election_timeout: Notify::new(),
        }
    }

    pub(crate) fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.run().await {
                tracing::error!(error = %err, "candidate control loop failed");
                if let Some(manager) = this.manager.upgrade() {
                    manager.candidate_failed(&this);
                }
            }
        });
    }

    pub(crate) fn stop(&self) {
        self.stop.cancel();
    }

    /// Wakes the control loop; a round in progress is abandoned for a new term.
    pub fn handle_election_timeout(&self) {
        self.election_timeout_occurred.store(true, Ordering::SeqCst);
        self.election_timeout.notify_one();
    }

    pub fn process_request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteResponse> {
        decide_vote(&self.ctx, &request)
    }

    /// A current-term AppendEntries means another server won this term.
    pub fn process_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let current_term = self.ctx.persistent.current_term();
        if request.term < current_term {
            return Ok(AppendEntriesResponse {
                term: current_term,
                success: false,
                match_index: self.ctx.persistent.last_log_entry_details().index,
            });
        }

        tracing::info!(
            leader = %request.leader_id,
            term = request.term,
            "conceding election to leader"
        );
        self.stop();
        let follower = self.manager()?.transition_to_follower_state(request.term)?;
        follower.process_append_entries(request)
    }

    fn manager(&self) -> Result<Arc<RaftModeManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| RaftError::IllegalState("mode manager dropped".into()))
    }

    async fn run(&self) -> Result<()> {
        while !self.stop.is_cancelled() {
            match self.start_new_election().await? {
                ElectionOutcome::Won(term) => {
                    self.manager()?.transition_to_leader_state(term)?;
                    return Ok(());
                }
                ElectionOutcome::SteppedDown | ElectionOutcome::Halted => return Ok(()),
                ElectionOutcome::Undecided => self.wait_for_election_timeout().await,
            }
        }
        Ok(())
    }

    async fn start_new_election(&self) -> Result<ElectionOutcome> {
        let ctx = &self.ctx;
        let term = ctx.persistent.increment_term_and_vote_for_self()?;
        self.election_timeout_occurred.store(false, Ordering::SeqCst);
        ctx.timer.restart();
        ctx.volatile.clear_leader_server_id();

        let last = ctx.persistent.last_log_entry_details();
        tracing::info!(
            server_id = %ctx.persistent.this_server_id(),
            term,
            last_log_index = last.index,
            last_log_term = last.term,
            "starting election"
        );

        let mut client = ctx.channels.create_candidate_rpc_client();
        client.request_votes(RequestVoteRequest {
            term,
            candidate_id: ctx.persistent.this_server_id(),
            last_log_index: last.index,
            last_log_term: last.term,
        });

        loop {
            if self.stop.is_cancelled() {
                return Ok(ElectionOutcome::Halted);
            }

            let results = client.current_request_votes_results();
            if results.largest_term_seen > term {
                tracing::info!(
                    term,
                    newer_term = results.largest_term_seen,
                    "newer term seen during election"
                );
                self.manager()?
                    .update_term_and_transition_to_follower(results.largest_term_seen)?;
                return Ok(ElectionOutcome::SteppedDown);
            }
            if self.received_majority_votes(&results) {
                tracing::info!(
                    term,
                    votes = results.number_votes_received + 1,
                    cluster_size = ctx.cluster_size(),
                    "won election"
                );
                return Ok(ElectionOutcome::Won(term));
            }
            if results.all_responses_received || self.election_timeout_occurred.load(Ordering::SeqCst)
            {
                tracing::debug!(
                    term,
                    votes = results.number_votes_received + 1,
                    "election round undecided"
                );
                return Ok(ElectionOutcome::Undecided);
            }

            tokio::select! {
                _ = client.changed() => {}
                _ = self.election_timeout.notified() => {}
                _ = self.stop.cancelled() => {}
            }
        }
    }

    /// Own vote plus granted votes must be a strict majority of the cluster.
    fn received_majority_votes(&self, results: &RequestVotesResults) -> bool {
        let votes = results.number_votes_received + 1;
        votes * 2 > self.ctx.cluster_size()
    }

    async fn wait_for_election_timeout(&self) {
        while !self.election_timeout_occurred.load(Ordering::SeqCst) && !self.stop.is_cancelled() {
            tokio::select! {
                _ = self.election_timeout.notified() => {}
                _ = self.stop.cancelled() => {}
            }
        }
    }
}

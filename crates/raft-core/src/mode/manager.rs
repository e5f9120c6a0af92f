//! # manager
//!
//! why: keep exactly one mode processor active and serialize every transition between modes
//! relations: owned by server.rs, fed by timer.rs events, called back by candidate.rs and leader.rs
//! what: RaftModeManager, rpc dispatch by mode

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::log::Term;
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
    SubmitResults,
};
use crate::rpc::RaftRpcHandler;
use crate::timer::ElectionTimeout;

use super::{
    RaftCandidateProcessor, RaftFollowerProcessor, RaftLeaderProcessor, RaftMode, SharedContext,
};

#[derive(Clone)]
enum ActiveProcessor {
    Follower(Arc<RaftFollowerProcessor>),
    Candidate(Arc<RaftCandidateProcessor>),
    Leader(Arc<RaftLeaderProcessor>),
}

impl ActiveProcessor {
    fn mode(&self) -> RaftMode {
        match self {
            ActiveProcessor::Follower(_) => RaftMode::Follower,
            ActiveProcessor::Candidate(_) => RaftMode::Candidate,
            ActiveProcessor::Leader(_) => RaftMode::Leader,
        }
    }

    fn stop(&self) {
        match self {
            ActiveProcessor::Follower(_) => {}
            ActiveProcessor::Candidate(candidate) => candidate.stop(),
            ActiveProcessor::Leader(leader) => leader.stop(),
        }
    }
}

/// Owns the active mode and performs every transition between modes.
///
/// Transitions happen under one lock, so at most one processor is active and a
/// stopped processor's late calls find a different mode and are ignored.
pub struct RaftModeManager {
    ctx: SharedContext,
    active: Mutex<ActiveProcessor>,
    this: Weak<RaftModeManager>,
    shutdown: CancellationToken,
}

impl RaftModeManager {
    pub(crate) fn new(ctx: SharedContext) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            active: Mutex::new(ActiveProcessor::Follower(Arc::new(
                RaftFollowerProcessor::new(Arc::clone(&ctx)),
            ))),
            ctx,
            this: this.clone(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Arms the election timer of the initial follower. Needs a tokio runtime.
    pub(crate) fn start(&self) {
        self.ctx.timer.restart();
    }

    pub fn mode(&self) -> RaftMode {
        self.active.lock().mode()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn active_processor(&self) -> ActiveProcessor {
        self.active.lock().clone()
    }

    /// Becomes follower, adopting `term` if it is newer.
    pub fn transition_to_follower_state(&self, term: Term) -> Result<Arc<RaftFollowerProcessor>> {
        let mut active = self.active.lock();
        self.ctx.persistent.update_term_if_newer(term)?;
        Ok(self.install_follower(&mut active))
    }

    /// Adopts `term` and becomes follower if `term` is newer than the current term.
    pub fn update_term_and_transition_to_follower(&self, term: Term) -> Result<bool> {
        let mut active = self.active.lock();
        if !self.ctx.persistent.update_term_if_newer(term)? {
            return Ok(false);
        }
        self.install_follower(&mut active);
        Ok(true)
    }

    fn install_follower(&self, active: &mut ActiveProcessor) -> Arc<RaftFollowerProcessor> {
        if let ActiveProcessor::Follower(follower) = &*active {
            return Arc::clone(follower);
        }

        let previous = active.mode();
        active.stop();
        if previous == RaftMode::Leader {
            self.ctx.volatile.clear_leader_server_id();
        }
        let follower = Arc::new(RaftFollowerProcessor::new(Arc::clone(&self.ctx)));
        *active = ActiveProcessor::Follower(Arc::clone(&follower));
        if !self.shutdown.is_cancelled() {
            self.ctx.timer.restart();
        }

        tracing::info!(
            server_id = %self.ctx.persistent.this_server_id(),
            from = %previous,
            term = self.ctx.persistent.current_term(),
            "transitioned to follower"
        );
        follower
    }

    /// Follower to candidate; ignored from any other mode.
    pub fn transition_to_candidate_state(&self) -> Result<()> {
        let mut active = self.active.lock();
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        if !matches!(*active, ActiveProcessor::Follower(_)) {
            tracing::debug!(mode = %active.mode(), "ignoring transition to candidate");
            return Ok(());
        }

        let candidate = Arc::new(RaftCandidateProcessor::new(
            Arc::clone(&self.ctx),
            self.this.clone(),
            self.shutdown.child_token(),
        ));
        *active = ActiveProcessor::Candidate(Arc::clone(&candidate));
        tracing::info!(
            server_id = %self.ctx.persistent.this_server_id(),
            term = self.ctx.persistent.current_term(),
            "transitioned to candidate"
        );
        candidate.start();
        Ok(())
    }

    /// Candidate to leader for `term`; ignored if the term or mode has moved on.
    pub fn transition_to_leader_state(&self, term: Term) -> Result<()> {
        let mut active = self.active.lock();
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        let current_term = self.ctx.persistent.current_term();
        if !matches!(*active, ActiveProcessor::Candidate(_)) || current_term != term {
            tracing::debug!(
                mode = %active.mode(),
                term,
                current_term,
                "ignoring stale transition to leader"
            );
            return Ok(());
        }

        active.stop();
        self.ctx.timer.cancel();
        self.ctx
            .volatile
            .set_leader_server_id(self.ctx.persistent.this_server_id());
        let leader = Arc::new(RaftLeaderProcessor::new(
            Arc::clone(&self.ctx),
            self.this.clone(),
            self.shutdown.child_token(),
            term,
        ));
        *active = ActiveProcessor::Leader(Arc::clone(&leader));
        tracing::info!(
            server_id = %self.ctx.persistent.this_server_id(),
            term,
            "transitioned to leader"
        );
        leader.start();
        Ok(())
    }

    /// A candidate whose control loop died hands the server back to a follower,
    /// whose election timer retries later.
    pub(crate) fn candidate_failed(&self, candidate: &Arc<RaftCandidateProcessor>) {
        self.recover_from_failed_processor(|active| {
            matches!(active, ActiveProcessor::Candidate(current) if Arc::ptr_eq(current, candidate))
        });
    }

    pub(crate) fn leader_failed(&self, leader: &Arc<RaftLeaderProcessor>) {
        self.recover_from_failed_processor(|active| {
            matches!(active, ActiveProcessor::Leader(current) if Arc::ptr_eq(current, leader))
        });
    }

    fn recover_from_failed_processor(&self, is_failed: impl FnOnce(&ActiveProcessor) -> bool) {
        let mut active = self.active.lock();
        if self.shutdown.is_cancelled() || !is_failed(&*active) {
            return;
        }
        tracing::warn!(
            server_id = %self.ctx.persistent.this_server_id(),
            mode = %active.mode(),
            "control loop failed, falling back to follower"
        );
        self.install_follower(&mut active);
    }

    pub fn handle_election_timeout(&self) -> Result<()> {
        match self.active_processor() {
            ActiveProcessor::Follower(_) => self.transition_to_candidate_state(),
            ActiveProcessor::Candidate(candidate) => {
                candidate.handle_election_timeout();
                Ok(())
            }
            ActiveProcessor::Leader(leader) => {
                tracing::warn!(term = leader.term(), "election timeout fired while leader");
                Ok(())
            }
        }
    }

    /// Drains timer events until shutdown, dropping events from superseded armings.
    pub(crate) async fn run_election_timeouts(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ElectionTimeout>,
    ) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            if !self.ctx.timer.is_current(&event) {
                tracing::trace!(generation = event.generation, "dropping stale election timeout");
                continue;
            }
            if let Err(err) = self.handle_election_timeout() {
                tracing::error!(error = %err, "failed to handle election timeout");
            }
        }
    }

    pub fn submit_command(&self, command: Vec<u8>) -> Result<SubmitResults> {
        match self.active_processor() {
            ActiveProcessor::Leader(leader) => leader.submit_command(command),
            _ => Ok(SubmitResults::NotLeader {
                leader_id: self.ctx.volatile.leader_server_id(),
            }),
        }
    }

    /// Stops the active processor and the timer; later transitions are ignored.
    pub fn shutdown(&self) {
        let active = self.active.lock();
        self.shutdown.cancel();
        active.stop();
        self.ctx.timer.cancel();
    }
}

impl RaftRpcHandler for RaftModeManager {
    fn handle_request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteResponse> {
        if request.term > self.ctx.persistent.current_term() {
            self.update_term_and_transition_to_follower(request.term)?;
        }
        match self.active_processor() {
            ActiveProcessor::Follower(follower) => follower.process_request_vote(request),
            ActiveProcessor::Candidate(candidate) => candidate.process_request_vote(request),
            ActiveProcessor::Leader(leader) => leader.process_request_vote(request),
        }
    }

    fn handle_append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        if request.term > self.ctx.persistent.current_term() {
            self.update_term_and_transition_to_follower(request.term)?;
        }
        match self.active_processor() {
            ActiveProcessor::Follower(follower) => follower.process_append_entries(request),
            ActiveProcessor::Candidate(candidate) => candidate.process_append_entries(request),
            ActiveProcessor::Leader(leader) => leader.process_append_entries(request),
        }
    }
}

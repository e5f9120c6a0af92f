//! # leader
//!
//! why: replicate the log to every follower and decide when entries are committed
//! relations: installed by manager.rs, sends through the rpc/ leader client, applies via applier.rs
//! what: RaftLeaderProcessor, per-peer progress, commit index rule

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ServerId;
use crate::error::{RaftError, Result};
use crate::log::{LogIndex, Term};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
    SubmitResults,
};
use crate::rpc::{AppendEntriesOutcome, RaftClusterLeaderRpcClient};

use super::{RaftModeManager, SharedContext};

/// Upper bound on entries carried by one AppendEntries.
const MAX_ENTRIES_PER_REQUEST: usize = 64;

/// Leader bookkeeping for one follower.
#[derive(Debug, Clone)]
struct PeerProgress {
    next_index: LogIndex,
    match_index: LogIndex,
    in_flight: bool,
}

/// Replicates the log and advances the commit index for one term.
///
/// nextIndex/matchIndex live inside the control loop; rpc replies reach it as
/// [`AppendEntriesOutcome`] messages, so no lock guards them.
pub struct RaftLeaderProcessor {
    ctx: SharedContext,
    manager: Weak<RaftModeManager>,
    stop: CancellationToken,
    term: Term,
    replicate_now: Notify,
}

impl RaftLeaderProcessor {
    pub(crate) fn new(
        ctx: SharedContext,
        manager: Weak<RaftModeManager>,
        stop: CancellationToken,
        term: Term,
    ) -> Self {
        Self {
            ctx,
            manager,
            stop,
            term,
            replicate_now: Notify::new(),
        }
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub(crate) fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.run().await {
                tracing::error!(term = this.term, error = %err, "leader control loop failed");
                this.stop();
                if let Some(manager) = this.manager.upgrade() {
                    manager.leader_failed(&this);
                }
            }
        });
    }

    pub(crate) fn stop(&self) {
        self.stop.cancel();
    }

    /// Append `command` to the local log and trigger replication.
    pub fn submit_command(&self, command: Vec<u8>) -> Result<SubmitResults> {
        let not_leader = || SubmitResults::NotLeader {
            leader_id: self.ctx.volatile.leader_server_id(),
        };
        if self.stop.is_cancelled() {
            return Ok(not_leader());
        }
        let Some(entry) = self.ctx.persistent.append_command(self.term, command)? else {
            return Ok(not_leader());
        };

        tracing::debug!(index = entry.index, term = entry.term, "command appended");
        self.replicate_now.notify_one();
        Ok(SubmitResults::Success {
            index: entry.index,
            term: entry.term,
        })
    }

    pub fn process_request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteResponse> {
        Err(RaftError::PreconditionFailed(format!(
            "leader of term {} does not vote (request from {} for term {})",
            self.term, request.candidate_id, request.term
        )))
    }

    pub fn process_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        Err(RaftError::PreconditionFailed(format!(
            "leader of term {} received append entries from {} for term {}",
            self.term, request.leader_id, request.term
        )))
    }

    async fn run(&self) -> Result<()> {
        let (client, mut outcomes) = self.ctx.channels.create_leader_rpc_client();
        let next_index = self.ctx.persistent.last_log_entry_details().index + 1;
        let mut peers: BTreeMap<ServerId, PeerProgress> = self
            .ctx
            .channels
            .peer_ids()
            .map(|peer| {
                (
                    peer,
                    PeerProgress {
                        next_index,
                        match_index: 0,
                        in_flight: false,
                    },
                )
            })
            .collect();

        let mut heartbeat = tokio::time::interval(self.ctx.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                _ = heartbeat.tick() => {
                    self.replicate(&client, &mut peers, true)?;
                    self.advance_commit_index(&peers)?;
                }
                _ = self.replicate_now.notified() => {
                    self.replicate(&client, &mut peers, false)?;
                    self.advance_commit_index(&peers)?;
                }
                Some(outcome) = outcomes.recv() => {
                    if !self.handle_outcome(&client, &mut peers, outcome)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Send to every idle peer; outside a heartbeat only peers that are behind.
    fn replicate(
        &self,
        client: &RaftClusterLeaderRpcClient,
        peers: &mut BTreeMap<ServerId, PeerProgress>,
        heartbeat: bool,
    ) -> Result<()> {
        let last_index = self.ctx.persistent.last_log_entry_details().index;
        for (peer_id, progress) in peers.iter_mut() {
            if progress.in_flight || (!heartbeat && progress.next_index > last_index) {
                continue;
            }
            self.send_append_entries(client, *peer_id, progress)?;
        }
        Ok(())
    }

    fn send_append_entries(
        &self,
        client: &RaftClusterLeaderRpcClient,
        peer_id: ServerId,
        progress: &mut PeerProgress,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let prev_log_index = progress.next_index - 1;
        let prev_log_term = ctx.persistent.term_at(prev_log_index).ok_or_else(|| {
            RaftError::IllegalState(format!(
                "next index {} for {} is past the end of the log",
                progress.next_index, peer_id
            ))
        })?;
        let entries = ctx
            .persistent
            .entries_from(progress.next_index, MAX_ENTRIES_PER_REQUEST);

        let request = AppendEntriesRequest {
            term: self.term,
            leader_id: ctx.persistent.this_server_id(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: ctx.volatile.highest_committed_entry_index(),
        };
        tracing::trace!(
            peer = %peer_id,
            prev_log_index,
            entries = request.entries.len(),
            "sending append entries"
        );
        progress.in_flight = client.send_append_entries(peer_id, request);
        Ok(())
    }

    /// Returns false once this leader has stepped down.
    fn handle_outcome(
        &self,
        client: &RaftClusterLeaderRpcClient,
        peers: &mut BTreeMap<ServerId, PeerProgress>,
        outcome: AppendEntriesOutcome,
    ) -> Result<bool> {
        let Some(progress) = peers.get_mut(&outcome.peer_id) else {
            return Ok(true);
        };
        progress.in_flight = false;

        let response = match outcome.result {
            Ok(response) => response,
            Err(err) => {
                tracing::trace!(peer = %outcome.peer_id, error = %err, "append entries failed");
                return Ok(true);
            }
        };

        if response.term > self.term {
            tracing::info!(
                term = self.term,
                newer_term = response.term,
                peer = %outcome.peer_id,
                "newer term seen by leader"
            );
            if let Some(manager) = self.manager.upgrade() {
                manager.update_term_and_transition_to_follower(response.term)?;
            }
            return Ok(false);
        }

        let last_index = self.ctx.persistent.last_log_entry_details().index;
        if response.success {
            progress.match_index = progress.match_index.max(outcome.last_entry_index);
            progress.next_index = progress.match_index + 1;
            let behind = progress.next_index <= last_index;
            if behind {
                self.send_append_entries(client, outcome.peer_id, progress)?;
            }
            self.advance_commit_index(peers)?;
        } else {
            let hinted = response.match_index.saturating_add(1);
            let previous = progress.next_index;
            progress.next_index = previous.saturating_sub(1).min(hinted).max(1);
            tracing::debug!(
                peer = %outcome.peer_id,
                from = previous,
                to = progress.next_index,
                "backing off next index"
            );
            self.send_append_entries(client, outcome.peer_id, progress)?;
        }
        Ok(true)
    }

    /// Commit the highest index stored on a majority, if it belongs to this term.
    fn advance_commit_index(&self, peers: &BTreeMap<ServerId, PeerProgress>) -> Result<()> {
        let ctx = &self.ctx;
        let mut match_indexes: Vec<LogIndex> =
            peers.values().map(|progress| progress.match_index).collect();
        match_indexes.push(ctx.persistent.last_log_entry_details().index);
        match_indexes.sort_unstable_by(|a, b| b.cmp(a));

        let majority_index = match_indexes[match_indexes.len() / 2];
        if majority_index <= ctx.volatile.highest_committed_entry_index() {
            return Ok(());
        }
        if ctx.persistent.term_at(majority_index) != Some(self.term) {
            return Ok(());
        }

        ctx.volatile
            .increase_highest_committed_entry_index_to(majority_index)?;
        tracing::debug!(term = self.term, commit_index = majority_index, "commit index advanced");
        ctx.apply_committed_entries()?;
        Ok(())
    }
}

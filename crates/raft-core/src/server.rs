//! # server
//!
//! why: one handle that boots a raft server and exposes it to a transport and to clients
//! relations: wires config.rs, state.rs, timer.rs, rpc/ and mode/ together
//! what: RaftServer

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{RaftConfiguration, ServerId};
use crate::error::Result;
use crate::log::{LogEntry, LogEntryDetails, LogIndex, Term};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
    SubmitResults,
};
use crate::mode::{CommittedEntryApplier, RaftContext, RaftMode, RaftModeManager};
use crate::rpc::{RaftClusterRpcChannelManager, RaftRpcChannel, RaftRpcHandler};
use crate::state::{RaftPersistentState, RaftVolatileState};
use crate::state_machine::StateMachine;
use crate::storage::Storage;
use crate::timer::RaftElectionTimer;

/// A running raft server.
///
/// Dropping it shuts the server down.
pub struct RaftServer {
    manager: Arc<RaftModeManager>,
    ctx: Arc<RaftContext>,
}

impl RaftServer {
    /// Restore state from `storage` and start as a follower.
    ///
    /// `channels` must hold one channel per peer. Spawns tasks, so it must be
    /// called from within a tokio runtime.
    pub fn start(
        config: RaftConfiguration,
        storage: Box<dyn Storage>,
        channels: HashMap<ServerId, Arc<dyn RaftRpcChannel>>,
        state_machine: Box<dyn StateMachine>,
    ) -> Result<Self> {
        config.validate()?;
        let channels = RaftClusterRpcChannelManager::new(&config, channels)?;
        let persistent = RaftPersistentState::load(config.this_server_id, storage)?;
        // commit and applied restart from zero; the log is re-applied as the leader recommits it
        let volatile = RaftVolatileState::new();
        volatile.initialize(0, 0)?;

        let (events, timeouts) = mpsc::unbounded_channel();
        let timer = RaftElectionTimer::new(config.timer_interval, events);

        let ctx = Arc::new(RaftContext {
            config,
            persistent,
            volatile,
            timer,
            channels,
            applier: CommittedEntryApplier::new(state_machine),
        });
        let manager = RaftModeManager::new(Arc::clone(&ctx));
        tokio::spawn(Arc::clone(&manager).run_election_timeouts(timeouts));
        manager.start();

        let last = ctx.persistent.last_log_entry_details();
        tracing::info!(
            server_id = %ctx.config.this_server_id,
            term = ctx.persistent.current_term(),
            voted_for = ?ctx.persistent.voted_for(),
            last_log_index = last.index,
            cluster_size = ctx.cluster_size(),
            "raft server started"
        );

        Ok(Self { manager, ctx })
    }

    /// Handler to register with the transport that delivers peers' rpcs.
    pub fn rpc_handler(&self) -> Arc<dyn RaftRpcHandler> {
        Arc::clone(&self.manager) as Arc<dyn RaftRpcHandler>
    }

    pub fn handle_request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteResponse> {
        self.manager.handle_request_vote(request)
    }

    pub fn handle_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        self.manager.handle_append_entries(request)
    }

    /// Submit a client command; only the leader accepts it.
    pub fn submit_command(&self, command: impl Into<Vec<u8>>) -> Result<SubmitResults> {
        self.manager.submit_command(command.into())
    }

    pub fn id(&self) -> ServerId {
        self.ctx.config.this_server_id
    }

    pub fn mode(&self) -> RaftMode {
        self.manager.mode()
    }

    pub fn is_leader(&self) -> bool {
        self.mode() == RaftMode::Leader
    }

    pub fn current_term(&self) -> Term {
        self.ctx.persistent.current_term()
    }

    pub fn voted_for(&self) -> Option<ServerId> {
        self.ctx.persistent.voted_for()
    }

    pub fn leader_id(&self) -> Option<ServerId> {
        self.ctx.volatile.leader_server_id()
    }

    pub fn commit_index(&self) -> LogIndex {
        self.ctx.volatile.highest_committed_entry_index()
    }

    pub fn last_applied(&self) -> LogIndex {
        self.ctx.volatile.highest_applied_entry_index()
    }

    pub fn last_log_entry_details(&self) -> LogEntryDetails {
        self.ctx.persistent.last_log_entry_details()
    }

    /// Copy of the whole log.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.ctx.persistent.entries_from(1, usize::MAX)
    }

    pub fn shutdown(&self) {
        if self.manager.is_shut_down() {
            return;
        }
        self.manager.shutdown();
        tracing::info!(server_id = %self.id(), "raft server stopped");
    }
}

impl Drop for RaftServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! # rpc
//!
//! why: turn per-peer rpc channels into the two cluster-wide views the modes need
//! relations: channels come from the embedding transport (or local.rs); clients are driven by mode/candidate.rs and mode/leader.rs
//! what: RaftRpcChannel, RaftRpcHandler, RaftClusterRpcChannelManager, candidate and leader rpc clients

pub mod local;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::config::{RaftConfiguration, ServerId};
use crate::error::{RaftError, Result};
use crate::log::{LogIndex, Term};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};

/// Why an rpc produced no usable response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("{0} is unreachable")]
    Unreachable(ServerId),

    #[error("rpc to {0} timed out")]
    Timeout(ServerId),

    #[error("rpc rejected by {peer}: {reason}")]
    Rejected { peer: ServerId, reason: String },
}

/// Client side of one peer connection.
#[async_trait]
pub trait RaftRpcChannel: Send + Sync {
    async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> std::result::Result<RequestVoteResponse, RpcError>;

    async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> std::result::Result<AppendEntriesResponse, RpcError>;
}

/// Server side: what a transport calls when a peer's rpc arrives.
pub trait RaftRpcHandler: Send + Sync {
    fn handle_request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteResponse>;

    fn handle_append_entries(&self, request: AppendEntriesRequest)
        -> Result<AppendEntriesResponse>;
}

/// Owns one channel per peer and hands out the per-mode clients.
pub struct RaftClusterRpcChannelManager {
    channels: BTreeMap<ServerId, Arc<dyn RaftRpcChannel>>,
    rpc_timeout: Duration,
}

impl RaftClusterRpcChannelManager {
    /// Requires exactly one channel for every peer named in `config`.
    pub fn new(
        config: &RaftConfiguration,
        mut channels: HashMap<ServerId, Arc<dyn RaftRpcChannel>>,
    ) -> Result<Self> {
        let mut by_peer = BTreeMap::new();
        for peer_id in config.peer_ids() {
            let channel = channels.remove(&peer_id).ok_or_else(|| {
                RaftError::InvalidConfiguration(format!("no rpc channel for peer {}", peer_id))
            })?;
            by_peer.insert(peer_id, channel);
        }
        if let Some(extra) = channels.keys().next() {
            return Err(RaftError::InvalidConfiguration(format!(
                "rpc channel given for {} which is not a peer",
                extra
            )));
        }

        Ok(Self {
            channels: by_peer,
            rpc_timeout: config.rpc_timeout(),
        })
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.channels.keys().copied()
    }

    pub fn create_candidate_rpc_client(&self) -> RaftClusterCandidateRpcClient {
        RaftClusterCandidateRpcClient::new(
            self.channels
                .iter()
                .map(|(id, channel)| (*id, Arc::clone(channel)))
                .collect(),
            self.rpc_timeout,
        )
    }

    /// Leader client plus the stream its replies arrive on.
    pub fn create_leader_rpc_client(
        &self,
    ) -> (
        RaftClusterLeaderRpcClient,
        mpsc::UnboundedReceiver<AppendEntriesOutcome>,
    ) {
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let client = RaftClusterLeaderRpcClient {
            channels: self.channels.clone(),
            rpc_timeout: self.rpc_timeout,
            outcomes,
        };
        (client, receiver)
    }
}

async fn call_with_timeout<T, F>(
    peer_id: ServerId,
    rpc_timeout: Duration,
    call: F,
) -> std::result::Result<T, RpcError>
where
    F: std::future::Future<Output = std::result::Result<T, RpcError>>,
{
    match tokio::time::timeout(rpc_timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(peer_id)),
    }
}

/// Snapshot of an in-progress vote round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestVotesResults {
    /// Votes granted by peers; the candidate's own vote is not included.
    pub number_votes_received: usize,
    pub largest_term_seen: Term,
    /// Every peer has either answered or failed.
    pub all_responses_received: bool,
}

#[derive(Debug, Default)]
struct VoteTally {
    votes: usize,
    largest_term_seen: Term,
    completed: usize,
    expected: usize,
}

/// One vote round: fans RequestVote out to every peer in parallel.
///
/// Dropping the client abandons the round; replies that arrive later are discarded.
pub struct RaftClusterCandidateRpcClient {
    channels: Vec<(ServerId, Arc<dyn RaftRpcChannel>)>,
    rpc_timeout: Duration,
    tally: Arc<watch::Sender<VoteTally>>,
    observer: watch::Receiver<VoteTally>,
    abandoned: Arc<AtomicBool>,
}

impl RaftClusterCandidateRpcClient {
    fn new(channels: Vec<(ServerId, Arc<dyn RaftRpcChannel>)>, rpc_timeout: Duration) -> Self {
        let (tally, observer) = watch::channel(VoteTally {
            expected: channels.len(),
            ..VoteTally::default()
        });
        Self {
            channels,
            rpc_timeout,
            tally: Arc::new(tally),
            observer,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Send `request` to every peer without waiting for the replies.
    pub fn request_votes(&self, request: RequestVoteRequest) {
        for (peer_id, channel) in &self.channels {
            let peer_id = *peer_id;
            let channel = Arc::clone(channel);
            let request = request.clone();
            let tally = Arc::clone(&self.tally);
            let abandoned = Arc::clone(&self.abandoned);
            let rpc_timeout = self.rpc_timeout;

            tokio::spawn(async move {
                let result =
                    call_with_timeout(peer_id, rpc_timeout, channel.request_vote(request)).await;
                if abandoned.load(Ordering::Acquire) {
                    return;
                }
                let response = match result {
                    Ok(response) => Some(response),
                    Err(err) => {
                        tracing::debug!(peer = %peer_id, error = %err, "vote request failed");
                        None
                    }
                };
                tally.send_modify(|tally| {
                    tally.completed += 1;
                    if let Some(response) = response {
                        tally.largest_term_seen = tally.largest_term_seen.max(response.term);
                        if response.vote_granted {
                            tally.votes += 1;
                        }
                    }
                });
            });
        }
    }

    pub fn current_request_votes_results(&self) -> RequestVotesResults {
        let tally = self.observer.borrow();
        RequestVotesResults {
            number_votes_received: tally.votes,
            largest_term_seen: tally.largest_term_seen,
            all_responses_received: tally.completed >= tally.expected,
        }
    }

    /// Resolves once the tally has moved past the version this method last returned for.
    pub async fn changed(&mut self) {
        // the sender lives in self, so this only fails if the client is torn down
        let _ = self.observer.changed().await;
    }
}

impl Drop for RaftClusterCandidateRpcClient {
    fn drop(&mut self) {
        self.abandoned.store(true, Ordering::Release);
    }
}

/// Reply (or failure) of one AppendEntries call, tagged with what was sent.
#[derive(Debug, Clone)]
pub struct AppendEntriesOutcome {
    pub peer_id: ServerId,
    pub prev_log_index: LogIndex,
    /// Index of the last entry carried by the request.
    pub last_entry_index: LogIndex,
    pub result: std::result::Result<AppendEntriesResponse, RpcError>,
}

/// Sends AppendEntries and reports each outcome on the leader's channel.
pub struct RaftClusterLeaderRpcClient {
    channels: BTreeMap<ServerId, Arc<dyn RaftRpcChannel>>,
    rpc_timeout: Duration,
    outcomes: mpsc::UnboundedSender<AppendEntriesOutcome>,
}

impl RaftClusterLeaderRpcClient {
    /// Returns false if `peer_id` has no channel.
    pub fn send_append_entries(&self, peer_id: ServerId, request: AppendEntriesRequest) -> bool {
        let Some(channel) = self.channels.get(&peer_id).cloned() else {
            return false;
        };
        let outcomes = self.outcomes.clone();
        let rpc_timeout = self.rpc_timeout;

        tokio::spawn(async move {
            let prev_log_index = request.prev_log_index;
            let last_entry_index = request.last_entry_index();
            let result =
                call_with_timeout(peer_id, rpc_timeout, channel.append_entries(request)).await;
            // a closed receiver means the leader has stepped down
            let _ = outcomes.send(AppendEntriesOutcome {
                peer_id,
                prev_log_index,
                last_entry_index,
                result,
            });
        });
        true
    }
}

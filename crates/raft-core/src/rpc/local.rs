//! # rpc::local
//!
//! why: run a whole cluster inside one process, with a network that can be cut
//! relations: implements RaftRpcChannel by calling peers' RaftRpcHandler directly; used by tests and demos
//! what: LocalNetwork, partition/isolate/heal controls

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{RaftRpcChannel, RaftRpcHandler, RpcError};
use crate::config::{RaftConfiguration, ServerId};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};

/// In-process message router between registered servers.
///
/// Handlers are held weakly so a dropped server simply becomes unreachable.
#[derive(Default)]
pub struct LocalNetwork {
    handlers: RwLock<HashMap<ServerId, Weak<dyn RaftRpcHandler>>>,
    /// Cut links, stored as ordered pairs in both directions.
    partitions: RwLock<HashSet<(ServerId, ServerId)>>,
    isolated: RwLock<HashSet<ServerId>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, id: ServerId, handler: &Arc<dyn RaftRpcHandler>) {
        self.handlers.write().insert(id, Arc::downgrade(handler));
    }

    pub fn unregister(&self, id: ServerId) {
        self.handlers.write().remove(&id);
    }

    /// Channel carrying rpcs from `from` to `to`.
    pub fn channel(self: &Arc<Self>, from: ServerId, to: ServerId) -> Arc<dyn RaftRpcChannel> {
        Arc::new(LocalChannel {
            network: Arc::clone(self),
            from,
            to,
        })
    }

    /// One channel per peer of `config.this_server_id`, ready for `RaftServer::start`.
    pub fn channels_for(
        self: &Arc<Self>,
        config: &RaftConfiguration,
    ) -> HashMap<ServerId, Arc<dyn RaftRpcChannel>> {
        config
            .peer_ids()
            .into_iter()
            .map(|peer| (peer, self.channel(config.this_server_id, peer)))
            .collect()
    }

    /// Cut the link between `a` and `b` in both directions.
    pub fn partition(&self, a: ServerId, b: ServerId) {
        let mut partitions = self.partitions.write();
        partitions.insert((a, b));
        partitions.insert((b, a));
        tracing::debug!(%a, %b, "link cut");
    }

    pub fn heal(&self, a: ServerId, b: ServerId) {
        let mut partitions = self.partitions.write();
        partitions.remove(&(a, b));
        partitions.remove(&(b, a));
    }

    /// Cut every link to and from `id`.
    pub fn isolate(&self, id: ServerId) {
        self.isolated.write().insert(id);
        tracing::debug!(server = %id, "server isolated");
    }

    pub fn reconnect(&self, id: ServerId) {
        self.isolated.write().remove(&id);
    }

    /// Restore every link.
    pub fn heal_all(&self) {
        self.partitions.write().clear();
        self.isolated.write().clear();
    }

    pub fn is_connected(&self, from: ServerId, to: ServerId) -> bool {
        let isolated = self.isolated.read();
        if isolated.contains(&from) || isolated.contains(&to) {
            return false;
        }
        !self.partitions.read().contains(&(from, to))
    }

    fn route(&self, from: ServerId, to: ServerId) -> Result<Arc<dyn RaftRpcHandler>, RpcError> {
        if !self.is_connected(from, to) {
            return Err(RpcError::Unreachable(to));
        }
        self.handlers
            .read()
            .get(&to)
            .and_then(Weak::upgrade)
            .ok_or(RpcError::Unreachable(to))
    }
}

struct LocalChannel {
    network: Arc<LocalNetwork>,
    from: ServerId,
    to: ServerId,
}

impl LocalChannel {
    /// A reply is lost if the link went down while the request was being handled.
    fn deliver_reply<T>(&self, reply: crate::error::Result<T>) -> Result<T, RpcError> {
        if !self.network.is_connected(self.to, self.from) {
            return Err(RpcError::Unreachable(self.to));
        }
        reply.map_err(|err| RpcError::Rejected {
            peer: self.to,
            reason: err.to_string(),
        })
    }
}

#[async_trait]
impl RaftRpcChannel for LocalChannel {
    async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, RpcError> {
        let handler = self.network.route(self.from, self.to)?;
        tokio::task::yield_now().await;
        self.deliver_reply(handler.handle_request_vote(request))
    }

    async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, RpcError> {
        let handler = self.network.route(self.from, self.to)?;
        tokio::task::yield_now().await;
        self.deliver_reply(handler.handle_append_entries(request))
    }
}

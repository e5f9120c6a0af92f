//! # raft-core
//!
//! why: implement the raft consensus engine behind a replicated key-value store
//! relations: raft-storage provides Storage and StateMachine implementations; transports drive rpc::RaftRpcHandler
//! what: log, persistent/volatile state, election timer, rpc clients, mode processors, server facade

pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod mode;
pub mod rpc;
pub mod server;
pub mod state;
pub mod state_machine;
pub mod storage;
pub mod timer;

pub use config::{RaftConfiguration, RaftServerInfo, RaftTimerInterval, ServerId};
pub use error::{ApplyError, RaftError, Result};
pub use log::{LogEntry, LogEntryDetails, LogIndex, RaftLog, Term};
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
    SubmitResults,
};
pub use mode::RaftMode;
pub use rpc::local::LocalNetwork;
pub use rpc::{RaftRpcChannel, RaftRpcHandler, RpcError};
pub use server::RaftServer;
pub use state_machine::{ApplyResult, StateMachine};
pub use storage::Storage;

//! # error
//!
//! why: give every raft operation one error vocabulary
//! relations: returned by log.rs, state.rs, mode/ and server.rs; storage failures convert in
//! what: RaftError, ApplyError, Result alias

use thiserror::Error;

use crate::config::ServerId;
use crate::log::LogIndex;

/// Errors produced by the consensus engine.
///
/// `InvalidArgument` and `IllegalState` mark programming errors in the caller
/// (regressing commit indices, double voting). They abort the operation but
/// never the process.
#[derive(Error, Debug)]
pub enum RaftError {
    #[error("log index {index} is out of range (log length {length})")]
    OutOfRange { index: LogIndex, length: u64 },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An RPC reached a mode processor that does not accept it.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("not the leader, current leader is {0:?}")]
    NotLeader(Option<ServerId>),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RaftError>;

/// Failure reported by a state machine while applying a committed command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("apply failed: {0}")]
    Failed(String),
}

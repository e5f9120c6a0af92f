//! # state_machine
//!
//! why: narrow contract between consensus and whatever consumes committed commands
//! relations: implemented by raft-storage's KvStore; driven by mode/applier.rs
//! what: StateMachine trait, ApplyResult

use crate::error::ApplyError;
use crate::log::LogIndex;

pub type ApplyResult = Result<Vec<u8>, ApplyError>;

/// The replicated state machine.
///
/// `apply` is called once per committed entry in strictly increasing index order.
/// After a restart the engine replays the log from index 1, so applying the same
/// command twice must leave the machine in the same state.
pub trait StateMachine: Send {
    fn apply(&mut self, index: LogIndex, command: &[u8]) -> ApplyResult;
}

//! # raft-storage
//!
//! why: concrete durability and state machine collaborators for raft-core
//! relations: implements raft_core::Storage and raft_core::StateMachine
//! what: FileStorage (json files, atomic writes), InMemoryStorage (restart-surviving test double), KvStore

mod file;
mod kv;
mod memory;

pub use file::FileStorage;
pub use kv::{KvCommand, KvStore, MAX_KEY_OR_VALUE_LEN};
pub use memory::InMemoryStorage;
pub use raft_core::Storage;

//! # kv
//!
//! why: the replicated application, a string key-value map driven by committed log entries
//! relations: implements raft_core::StateMachine
//! what: KvCommand text encoding, KvStore

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use raft_core::{ApplyError, ApplyResult, LogIndex, StateMachine};

/// Longest key or value accepted, in characters.
pub const MAX_KEY_OR_VALUE_LEN: usize = 256;

/// A command carried in the raft log, encoded as a single line of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvCommand {
    Set { key: String, value: String },
    Delete { key: String },
}

impl KvCommand {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        KvCommand::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        KvCommand::Delete { key: key.into() }
    }

    /// Bytes to submit to the leader.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parses `SET <key> <value>` or `DEL <key>`; the value is the rest of the line.
    pub fn decode(bytes: &[u8]) -> Result<Self, ApplyError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ApplyError::InvalidCommand("command is not valid utf-8".into()))?;
        let mut parts = text.trim().splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim_start();

        let command = match verb.to_ascii_uppercase().as_str() {
            "SET" => {
                let mut args = rest.splitn(2, char::is_whitespace);
                let key = args.next().unwrap_or_default();
                let value = args.next().unwrap_or_default().trim();
                KvCommand::set(key, value)
            }
            "DEL" => {
                if rest.split_whitespace().count() > 1 {
                    return Err(ApplyError::InvalidCommand(format!(
                        "DEL takes one key, got [{}]",
                        rest
                    )));
                }
                KvCommand::delete(rest.trim())
            }
            other => {
                return Err(ApplyError::InvalidCommand(format!(
                    "unknown command [{}]",
                    other
                )))
            }
        };
        command.validate()?;
        Ok(command)
    }

    fn validate(&self) -> Result<(), ApplyError> {
        match self {
            KvCommand::Set { key, value } => {
                check_field("key", key)?;
                check_field("value", value)
            }
            KvCommand::Delete { key } => check_field("key", key),
        }
    }
}

fn check_field(name: &str, field: &str) -> Result<(), ApplyError> {
    if field.trim().is_empty() {
        return Err(ApplyError::InvalidCommand(format!("expected non-blank {}", name)));
    }
    let len = field.chars().count();
    if len > MAX_KEY_OR_VALUE_LEN {
        return Err(ApplyError::InvalidCommand(format!(
            "{} is {} characters, limit is {}",
            name, len, MAX_KEY_OR_VALUE_LEN
        )));
    }
    Ok(())
}

impl fmt::Display for KvCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvCommand::Set { key, value } => write!(f, "SET {} {}", key, value),
            KvCommand::Delete { key } => write!(f, "DEL {}", key),
        }
    }
}

/// String key-value store fed by committed log entries.
///
/// Clones share the same map, so a test can keep a handle for reads while
/// the raft server owns the one it applies to.
#[derive(Clone, Default)]
pub struct KvStore {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data.read().clone()
    }
}

impl StateMachine for KvStore {
    /// SET returns the previous value, DEL the removed one; empty when there was none.
    fn apply(&mut self, index: LogIndex, command: &[u8]) -> ApplyResult {
        let command = KvCommand::decode(command)?;
        let previous = match &command {
            KvCommand::Set { key, value } => self.data.write().insert(key.clone(), value.clone()),
            KvCommand::Delete { key } => self.data.write().remove(key),
        };
        tracing::trace!(index, %command, "kv command applied");
        Ok(previous.map(String::into_bytes).unwrap_or_default())
    }
}

//! # config
//!
//! why: describe the static cluster and the timing knobs the engine runs with
//! relations: consumed by timer.rs, rpc/, mode/ and server.rs; loaded from json by callers
//! what: ServerId, RaftServerInfo, RaftTimerInterval, RaftConfiguration

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};

/// Stable identifier of a server in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub u64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server-{}", self.0)
    }
}

/// A cluster member and where it listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftServerInfo {
    pub id: ServerId,
    pub address: SocketAddr,
}

/// Bounds the election timeout is drawn from, in milliseconds (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftTimerInterval {
    pub minimum_ms: u64,
    pub maximum_ms: u64,
}

impl Default for RaftTimerInterval {
    fn default() -> Self {
        Self {
            minimum_ms: 150,
            maximum_ms: 300,
        }
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    50
}

fn default_rpc_timeout_ms() -> u64 {
    100
}

/// Everything the consensus engine needs to know about its cluster.
///
/// Membership is fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfiguration {
    pub this_server_id: ServerId,
    pub cluster_servers: Vec<RaftServerInfo>,
    #[serde(default)]
    pub timer_interval: RaftTimerInterval,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl RaftConfiguration {
    /// Create a configuration with default timings.
    pub fn new(this_server_id: ServerId, cluster_servers: Vec<RaftServerInfo>) -> Self {
        Self {
            this_server_id,
            cluster_servers,
            timer_interval: RaftTimerInterval::default(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }

    /// Parse and validate a json document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a json file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RaftError::InvalidConfiguration(msg));

        if self.timer_interval.minimum_ms == 0 {
            return invalid("timer_interval.minimum_ms should be positive (found 0)".into());
        }
        if self.timer_interval.maximum_ms < self.timer_interval.minimum_ms {
            return invalid(format!(
                "timer_interval.maximum_ms [{}] is lower than minimum_ms [{}]",
                self.timer_interval.maximum_ms, self.timer_interval.minimum_ms
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return invalid("heartbeat_interval_ms should be positive (found 0)".into());
        }
        if self.heartbeat_interval_ms >= self.timer_interval.minimum_ms {
            return invalid(format!(
                "heartbeat_interval_ms [{}] must be shorter than the minimum election timeout [{}]",
                self.heartbeat_interval_ms, self.timer_interval.minimum_ms
            ));
        }
        if self.rpc_timeout_ms == 0 {
            return invalid("rpc_timeout_ms should be positive (found 0)".into());
        }

        let mut seen = HashSet::new();
        for server in &self.cluster_servers {
            if !seen.insert(server.id) {
                return invalid(format!("duplicate server id {}", server.id));
            }
        }
        if !seen.contains(&self.this_server_id) {
            return invalid(format!(
                "this_server_id {} is not a cluster member",
                self.this_server_id
            ));
        }
        Ok(())
    }

    /// Ids of every cluster member except this server.
    pub fn peer_ids(&self) -> Vec<ServerId> {
        self.cluster_servers
            .iter()
            .map(|s| s.id)
            .filter(|id| *id != self.this_server_id)
            .collect()
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_servers.len()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(ids: &[u64]) -> Vec<RaftServerInfo> {
        ids.iter()
            .map(|&id| RaftServerInfo {
                id: ServerId(id),
                address: format!("127.0.0.1:{}", 9000 + id).parse().unwrap(),
            })
            .collect()
    }

    #[test]
    fn default_timings() {
        let config = RaftConfiguration::new(ServerId(1), servers(&[1, 2, 3]));
        assert_eq!(config.timer_interval.minimum_ms, 150);
        assert_eq!(config.timer_interval.maximum_ms, 300);
        assert_eq!(config.heartbeat_interval_ms, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn peer_ids_exclude_self() {
        let config = RaftConfiguration::new(ServerId(2), servers(&[1, 2, 3]));
        assert_eq!(config.peer_ids(), vec![ServerId(1), ServerId(3)]);
        assert_eq!(config.cluster_size(), 3);
    }

    #[test]
    fn rejects_heartbeat_not_shorter_than_election_timeout() {
        let mut config = RaftConfiguration::new(ServerId(1), servers(&[1, 2, 3]));
        config.heartbeat_interval_ms = 150;
        assert!(matches!(
            config.validate(),
            Err(RaftError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_inverted_timer_bounds() {
        let mut config = RaftConfiguration::new(ServerId(1), servers(&[1]));
        config.timer_interval = RaftTimerInterval {
            minimum_ms: 300,
            maximum_ms: 200,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_self_and_duplicates() {
        let config = RaftConfiguration::new(ServerId(7), servers(&[1, 2, 3]));
        assert!(config.validate().is_err());

        let config = RaftConfiguration::new(ServerId(1), servers(&[1, 2, 2]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_json_with_defaults() {
        let json = r#"{
            "this_server_id": 1,
            "cluster_servers": [
                { "id": 1, "address": "127.0.0.1:9001" },
                { "id": 2, "address": "127.0.0.1:9002" },
                { "id": 3, "address": "127.0.0.1:9003" }
            ],
            "timer_interval": { "minimum_ms": 200, "maximum_ms": 400 }
        }"#;
        let config = RaftConfiguration::from_json_str(json).unwrap();
        assert_eq!(config.this_server_id, ServerId(1));
        assert_eq!(config.timer_interval.minimum_ms, 200);
        assert_eq!(config.heartbeat_interval_ms, 50);
        assert_eq!(config.rpc_timeout_ms, 100);
    }
}

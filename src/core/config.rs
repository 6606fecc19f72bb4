//! Raft configuration parameters

use std::path::PathBuf;
use std::time::Duration;

use super::membership::{ClusterConfiguration, NodeId};
use crate::cluster::Peer;

/// Configuration for Raft timing parameters
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Interval between heartbeats sent by leader (default: 150ms)
    pub heartbeat_interval: Duration,
    /// Minimum election timeout (default: 300ms)
    pub election_timeout_min: Duration,
    /// Maximum election timeout (default: 500ms)
    pub election_timeout_max: Duration,
    /// Number of applied log entries before triggering automatic snapshot (default: 1000)
    /// Set to 0 to disable automatic snapshots
    pub snapshot_threshold: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(150),
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(500),
            snapshot_threshold: 1000,
        }
    }
}

impl RaftConfig {
    /// Create a new config with custom heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Create a new config with custom election timeout range
    pub fn with_election_timeout(mut self, min: Duration, max: Duration) -> Self {
        self.election_timeout_min = min;
        self.election_timeout_max = max;
        self
    }

    /// Create a new config with custom snapshot threshold
    /// Set to 0 to disable automatic snapshots
    pub fn with_snapshot_threshold(mut self, threshold: u64) -> Self {
        self.snapshot_threshold = threshold;
        self
    }

    /// Generate a random election timeout within the configured range
    pub fn random_election_timeout(&self) -> Duration {
        use rand::Rng;
        let min_ms = self.election_timeout_min.as_millis() as u64;
        let max_ms = self.election_timeout_max.as_millis() as u64;
        if max_ms <= min_ms {
            return self.election_timeout_min;
        }
        let timeout_ms = rand::rng().random_range(min_ms..=max_ms);
        Duration::from_millis(timeout_ms)
    }
}

/// Identity and addressing of one node, fixed for the life of the process
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: NodeId,
    /// Address the consensus RPC router listens on
    pub raft_addr: String,
    /// Address the RESP server listens on
    pub client_addr: String,
    /// Every other voter
    pub peers: Vec<Peer>,
    pub data_dir: PathBuf,
    /// How long a write waits for its entry to be applied (default: 1s)
    pub apply_timeout: Duration,
}

impl NodeConfig {
    pub fn new(
        id: impl Into<NodeId>,
        raft_addr: impl Into<String>,
        client_addr: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            raft_addr: raft_addr.into(),
            client_addr: client_addr.into(),
            peers: Vec::new(),
            data_dir: PathBuf::from("data"),
            apply_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_peers(mut self, peers: Vec<Peer>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    /// The full voter set: this node plus every peer
    pub fn cluster_configuration(&self) -> ClusterConfiguration {
        self.peers.iter().fold(
            ClusterConfiguration::new().with_voter(self.id.clone(), self.raft_addr.clone()),
            |config, peer| config.with_voter(peer.id.clone(), peer.raft_addr.clone()),
        )
    }

    /// Node ID -> client address for this node and every peer
    pub fn client_addresses(&self) -> Vec<(NodeId, String)> {
        std::iter::once((self.id.clone(), self.client_addr.clone()))
            .chain(self.peers.iter().map(|p| (p.id.clone(), p.client_addr.clone())))
            .collect()
    }
}

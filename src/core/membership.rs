//! Cluster membership types
//!
//! The voter set is fixed at bootstrap: it travels through the replicated
//! log as the first entry and is carried in snapshot metadata so a node
//! that only sees a snapshot still knows who its peers are.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque, cluster-unique node identifier
pub type NodeId = String;

/// The set of voting members and their consensus-transport addresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    pub voters: BTreeMap<NodeId, String>,
}

impl ClusterConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a voter (builder style)
    pub fn with_voter(mut self, id: impl Into<NodeId>, raft_addr: impl Into<String>) -> Self {
        self.voters.insert(id.into(), raft_addr.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.voters.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    /// Votes (or matching replicas) needed for a majority
    pub fn quorum(&self) -> usize {
        self.voters.len() / 2 + 1
    }

    /// All voters except `local`
    pub fn peers_of(&self, local: &str) -> Vec<NodeId> {
        self.voters
            .keys()
            .filter(|id| id.as_str() != local)
            .cloned()
            .collect()
    }
}

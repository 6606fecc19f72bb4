//! Raft consensus
//!
//! - `RaftCore`: synchronous protocol state machine (votes, log, commit, snapshots)
//! - `RaftNode`: concurrent RPC fan-out over a `Transport`
//! - `RaftServer` / `RaftHandle`: timer-driven event loop and client API

pub mod config;
pub mod error;
pub mod membership;
pub mod raft_core;
pub mod raft_node;
pub mod raft_server;
pub mod snapshot;

pub use config::{NodeConfig, RaftConfig};
pub use error::RaftError;
pub use membership::{ClusterConfiguration, NodeId};
pub use raft_core::{EntryPayload, LeadershipState, LogEntry, Proposal, RaftCore, RaftState};
pub use raft_node::{PeerProgress, RaftNode, SharedCore};
pub use raft_server::{RaftHandle, RaftServer};
pub use snapshot::{Snapshot, SnapshotError, SnapshotMetadata};

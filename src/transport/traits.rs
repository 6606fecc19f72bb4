//! Transport abstraction for Raft RPC communication

use async_trait::async_trait;
use thiserror::Error;

use crate::core::raft_core::{
    AppendEntriesArgs, AppendEntriesResult, InstallSnapshotArgs, InstallSnapshotResult,
    RequestVoteArgs, RequestVoteResult,
};

/// Transport abstraction for Raft RPC communication
///
/// Targets are node IDs; each implementation resolves them to whatever
/// addressing it uses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a RequestVote RPC to a peer node
    async fn request_vote(
        &self,
        target: &str,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteResult, TransportError>;

    /// Send an AppendEntries RPC to a peer node
    async fn append_entries(
        &self,
        target: &str,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesResult, TransportError>;

    /// Send an InstallSnapshot RPC to a peer node
    async fn install_snapshot(
        &self,
        target: &str,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotResult, TransportError>;
}

/// Errors that can occur during transport operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection to the target node failed
    #[error("connection failed")]
    ConnectionFailed,
    /// Request timed out
    #[error("request timed out")]
    Timeout,
    /// Target node not found
    #[error("node not found")]
    NodeNotFound,
    /// Peer answered but could not process the request
    #[error("peer returned status {status}")]
    Remote { status: u16 },
    /// Transport could not be constructed
    #[error("transport setup failed: {0}")]
    Setup(String),
}

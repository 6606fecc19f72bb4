//! Errors surfaced by the consensus module

use thiserror::Error;

use super::membership::NodeId;
use crate::state_machine::ApplyError;
use crate::storage::StorageError;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaftError {
    /// This node is not the leader (includes the leader if known)
    #[error("node is not the leader")]
    NotLeader { leader: Option<NodeId> },
    /// The entry was not applied within the caller's deadline; it may still commit
    #[error("timed out waiting for the entry to commit")]
    Timeout,
    /// This node stepped down, or the entry at the proposed index was replaced
    #[error("leadership lost before the entry committed")]
    LeadershipLost,
    #[error("node is already bootstrapped")]
    AlreadyBootstrapped,
    /// The entry committed but the state machine rejected it
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("raft server is shut down")]
    Shutdown,
}

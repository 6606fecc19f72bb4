//! Snapshot types for log compaction
//!
//! Snapshots allow discarding old log entries by capturing
//! the state machine state at a specific log index.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::membership::ClusterConfiguration;
use crate::kv::KvError;
use crate::storage::StorageError;

/// Metadata about what's included in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotMetadata {
    /// Last log index included in this snapshot
    pub last_included_index: u64,
    /// Term of the last included log entry
    pub last_included_term: u64,
    /// Voter set in effect at `last_included_index`
    #[serde(default)]
    pub configuration: ClusterConfiguration,
}

/// A snapshot of the state machine at a specific point in the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    /// Serialized state machine data
    #[serde(with = "crate::encoding::base64_bytes")]
    pub data: Vec<u8>,
}

/// Reasons a snapshot could not be taken
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    #[error("no entries applied yet")]
    NothingApplied,
    #[error("already have snapshot up to index {snapshot_index}, last applied is {last_applied}")]
    AlreadyCovered { snapshot_index: u64, last_applied: u64 },
    #[error("entry {0} missing from log")]
    MissingEntry(u64),
    #[error("state machine snapshot failed: {0}")]
    StateMachine(#[from] KvError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

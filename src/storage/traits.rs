//! Storage trait for Raft persistent state

use thiserror::Error;

use crate::core::membership::NodeId;
use crate::core::raft_core::LogEntry;
use crate::core::snapshot::Snapshot;

/// Errors that can occur during storage operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// I/O error (e.g., disk full, permission denied)
    #[error("I/O error: {0}")]
    Io(String),
    /// Data corruption detected
    #[error("data corruption: {0}")]
    Corruption(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Storage trait for Raft persistent state
///
/// Implementations must ensure durability - data must survive crashes.
/// All operations are synchronous to simplify the RaftCore logic.
/// The `Send` bound is required for use in async contexts.
pub trait Storage: Send {
    /// Load the current term from storage
    /// Returns 0 if no term has been persisted (fresh start)
    fn load_term(&self) -> Result<u64, StorageError>;

    /// Save the current term to storage
    /// Must be durable before returning
    fn save_term(&mut self, term: u64) -> Result<(), StorageError>;

    /// Load the voted_for value from storage
    fn load_voted_for(&self) -> Result<Option<NodeId>, StorageError>;

    /// Must be durable before returning
    fn save_voted_for(&mut self, voted_for: Option<&str>) -> Result<(), StorageError>;

    /// Load all log entries from storage, in index order
    fn load_log(&self) -> Result<Vec<LogEntry>, StorageError>;

    /// Append entries after any existing entries
    fn append_log_entries(&mut self, entries: &[LogEntry]) -> Result<(), StorageError>;

    /// Removes all entries with index >= from_index
    /// Used for conflict resolution in AppendEntries
    fn truncate_log(&mut self, from_index: u64) -> Result<(), StorageError>;

    /// Removes all entries with index < before_index
    /// Used for snapshot-based log compaction
    fn compact_log(&mut self, before_index: u64) -> Result<(), StorageError>;

    /// Load the most recent snapshot, if any
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError>;

    /// Must be durable before returning
    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StorageError>;
}

//! In-memory storage implementation for testing
//!
//! Fast, no side effects, no persistence across restarts.

use super::{Storage, StorageError};
use crate::core::membership::NodeId;
use crate::core::raft_core::LogEntry;
use crate::core::snapshot::Snapshot;

/// In-memory storage implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    term: u64,
    voted_for: Option<NodeId>,
    log: Vec<LogEntry>,
    snapshot: Option<Snapshot>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load_term(&self) -> Result<u64, StorageError> {
        Ok(self.term)
    }

    fn save_term(&mut self, term: u64) -> Result<(), StorageError> {
        self.term = term;
        Ok(())
    }

    fn load_voted_for(&self) -> Result<Option<NodeId>, StorageError> {
        Ok(self.voted_for.clone())
    }

    fn save_voted_for(&mut self, voted_for: Option<&str>) -> Result<(), StorageError> {
        self.voted_for = voted_for.map(str::to_string);
        Ok(())
    }

    fn load_log(&self) -> Result<Vec<LogEntry>, StorageError> {
        Ok(self.log.clone())
    }

    fn append_log_entries(&mut self, entries: &[LogEntry]) -> Result<(), StorageError> {
        self.log.extend(entries.iter().cloned());
        Ok(())
    }

    fn truncate_log(&mut self, from_index: u64) -> Result<(), StorageError> {
        // After compaction the first stored entry is not index 1, so filter
        // by index rather than by position
        self.log.retain(|e| e.index < from_index);
        Ok(())
    }

    fn compact_log(&mut self, before_index: u64) -> Result<(), StorageError> {
        self.log.retain(|e| e.index >= before_index);
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        Ok(self.snapshot.clone())
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.snapshot = Some(snapshot.clone());
        Ok(())
    }
}

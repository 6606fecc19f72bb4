//! State machine abstraction for Raft
//!
//! The state machine is the application logic that Raft coordinates.
//! When log entries are committed, their command payloads are applied to
//! the state machine in index order.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kv::KvError;

/// Successful outcome of applying one committed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutput {
    /// Entry carried no application command (no-op, configuration)
    Empty,
    /// A put was stored
    Stored,
    /// A delete ran; `removed` is the number of keys removed (0 or 1)
    Deleted { removed: u64 },
}

/// Deterministic failure while applying a committed entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Store(#[from] KvError),
    #[error("malformed command payload: {0}")]
    Decode(String),
}

pub type ApplyResult = Result<ApplyOutput, ApplyError>;

/// State machine trait - the application logic that Raft coordinates
///
/// Implementations must be deterministic: applying the same payloads
/// in the same order must produce the same state on all nodes.
pub trait StateMachine: Send {
    fn apply(&mut self, payload: &[u8]) -> ApplyResult;
}

/// Snapshotable state machine - supports log compaction
pub trait Snapshotable: StateMachine {
    /// Serialize the current state
    fn snapshot(&self) -> Result<Vec<u8>, KvError>;

    /// Replace current state with the snapshot's state
    fn restore(&mut self, data: &[u8]) -> Result<(), KvError>;
}

/// Shared record of applied payloads for testing
pub type AppliedCommands = Arc<Mutex<Vec<Vec<u8>>>>;

/// Test state machine that records all applied payloads to a shared vec
#[derive(Default)]
pub struct TestStateMachine {
    applied: AppliedCommands,
}

impl TestStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a shared vec to inspect applied payloads from outside
    pub fn new_shared(applied: AppliedCommands) -> Self {
        TestStateMachine { applied }
    }
}

impl StateMachine for TestStateMachine {
    fn apply(&mut self, payload: &[u8]) -> ApplyResult {
        self.applied.lock().push(payload.to_vec());
        Ok(ApplyOutput::Stored)
    }
}

impl Snapshotable for TestStateMachine {
    fn snapshot(&self) -> Result<Vec<u8>, KvError> {
        let applied = self.applied.lock().clone();
        serde_json::to_vec(&applied).map_err(|e| KvError::Snapshot(e.to_string()))
    }

    fn restore(&mut self, data: &[u8]) -> Result<(), KvError> {
        let applied: Vec<Vec<u8>> =
            serde_json::from_slice(data).map_err(|e| KvError::Restore(e.to_string()))?;
        *self.applied.lock() = applied;
        Ok(())
    }
}

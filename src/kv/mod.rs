//! Key-value store capability contract
//!
//! The replicated keyspace lives behind the `Store` trait so any backend
//! (in-memory map, on-disk engine) can be plugged in without touching the
//! consensus module or the command layer.
//!
//! - `MemoryStore`: ordered in-memory map guarded by a read-write lock

pub mod memory;

pub use memory::MemoryStore;

use thiserror::Error;

/// Errors returned by key-value store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// The requested key does not exist
    #[error("key not found")]
    KeyNotFound,
    /// Snapshot could not be produced
    #[error("snapshot failed: {0}")]
    Snapshot(String),
    /// Snapshot data could not be restored
    #[error("restore failed: {0}")]
    Restore(String),
}

/// Operations available inside a store transaction
pub trait Txn {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, KvError>;
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvError>;
    fn delete(&mut self, key: &[u8]) -> Result<(), KvError>;
    fn exists(&self, key: &[u8]) -> Result<bool, KvError>;
}

/// Key-value store used as the state machine's mutation target
///
/// Implementations provide their own internal concurrency control; every
/// method takes `&self` so the store can be shared between the state
/// machine (the only writer) and the command layer (local reads).
pub trait Store: Send + Sync {
    /// Read a value; returns `KvError::KeyNotFound` when absent
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, KvError>;

    /// Insert or overwrite a value
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Remove a key; returns `KvError::KeyNotFound` when absent
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    fn exists(&self, key: &[u8]) -> Result<bool, KvError>;

    /// Produce a self-contained, point-in-time serialization of the whole store
    fn snapshot(&self) -> Result<Vec<u8>, KvError>;

    /// Replace the entire store content with a snapshot's content
    fn restore(&self, data: &[u8]) -> Result<(), KvError>;

    /// Run `f` atomically: either every write it stages becomes visible,
    /// or (when `f` returns an error) none of them do
    fn txn(&self, f: &mut dyn FnMut(&mut dyn Txn) -> Result<(), KvError>) -> Result<(), KvError>;
}

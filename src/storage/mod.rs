//! Storage abstraction for Raft persistent state
//!
//! Raft requires certain state to be persisted to stable storage before
//! responding to RPCs: current_term, voted_for, and log entries.
//!
//! This module provides a trait abstraction allowing different implementations:
//! - `MemoryStorage`: Fast, in-memory storage for testing
//! - `FileStorage`: File-based storage with CRC32 checksums
//!
//! Node metadata that is not part of the replicated log (the client address
//! of every voter) lives in a separate `StableStore`.

pub mod file;
pub mod memory;
pub mod stable;
pub mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use stable::{FileStableStore, MemoryStableStore, StableStore};
pub use traits::{Storage, StorageError};

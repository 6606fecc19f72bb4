//! Raft-replicated key-value store with a Redis-compatible frontend
//!
//! Writes (`SET`/`DEL`) go through Raft consensus and are acknowledged after
//! they are applied on the leader; reads (`GET`) are served from the local
//! replica.

pub mod api;
pub mod cluster;
pub mod core;
pub mod encoding;
pub mod kv;
pub mod state_machine;
pub mod storage;
pub mod transport;

/// Testing utilities for integration tests.
pub mod testing;

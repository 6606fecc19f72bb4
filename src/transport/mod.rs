//! Peer-to-peer Raft RPC
//!
//! - `inmemory`: channel-backed transport driven by tests
//! - `http`: JSON over HTTP, with the axum router that serves incoming RPCs

pub mod http;
pub mod inmemory;
pub mod traits;

pub use traits::{Transport, TransportError};

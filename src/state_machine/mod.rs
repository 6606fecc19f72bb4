//! State machine layer for Raft
//!
//! - `KvStateMachine`: applies replicated commands to a key-value `Store`
//! - `TestStateMachine`: Records payloads for testing

pub mod command;
pub mod fsm;
pub mod traits;

pub use command::{Command, DecodeError, Op};
pub use fsm::KvStateMachine;
pub use traits::{
    AppliedCommands, ApplyError, ApplyOutput, ApplyResult, Snapshotable, StateMachine,
    TestStateMachine,
};

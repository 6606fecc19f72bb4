//! Redis-compatible client frontend
//!
//! - `resp`: RESP framing codec
//! - `command`: GET/SET/DEL parsing and arity checks
//! - `handler`: executes commands against the store and the Raft handle
//! - `server`: TCP accept loop, one task per connection

pub mod command;
pub mod handler;
pub mod resp;
pub mod server;

pub use command::{ClientCommand, CommandError};
pub use handler::CommandHandler;
pub use resp::{Frame, ProtocolError, RespCodec};
pub use server::RespServer;

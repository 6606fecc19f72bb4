//! Executes parsed client commands against the local node
//!
//! Reads are served from the local store. Writes are gated on leadership,
//! encoded as replicated commands and acknowledged only after they have been
//! applied here.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::command::ClientCommand;
use super::resp::Frame;
use crate::cluster::{client_addr, ClusterError};
use crate::core::error::RaftError;
use crate::core::membership::NodeId;
use crate::core::raft_server::RaftHandle;
use crate::kv::{KvError, Store};
use crate::state_machine::{ApplyOutput, Command};
use crate::storage::StableStore;

fn error_reply(err: impl Display) -> Frame {
    Frame::error(format!("ERR {}", err))
}

#[derive(Clone)]
pub struct CommandHandler {
    node_id: NodeId,
    store: Arc<dyn Store>,
    raft: RaftHandle,
    stable: Arc<dyn StableStore>,
    apply_timeout: Duration,
}

impl CommandHandler {
    pub fn new(
        node_id: impl Into<NodeId>,
        store: Arc<dyn Store>,
        raft: RaftHandle,
        stable: Arc<dyn StableStore>,
        apply_timeout: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            raft,
            stable,
            apply_timeout,
        }
    }

    /// Turn one request frame into exactly one reply frame
    pub async fn handle(&self, request: Frame) -> Frame {
        let command = match ClientCommand::parse(request) {
            Ok(command) => command,
            Err(e) => return error_reply(e),
        };

        if command.is_write() && !self.raft.is_leader() {
            return self.redirect(self.raft.current_leader());
        }

        match command {
            ClientCommand::Get { key } => self.get(&key),
            ClientCommand::Set { key, value } => self.write(Command::put(key.to_vec(), value.to_vec())).await,
            ClientCommand::Del { key } => self.write(Command::delete(key.to_vec())).await,
        }
    }

    fn get(&self, key: &[u8]) -> Frame {
        match self.store.get(key) {
            Ok(value) => Frame::Bulk(value.into()),
            Err(KvError::KeyNotFound) => Frame::Null,
            Err(e) => error_reply(e),
        }
    }

    async fn write(&self, command: Command) -> Frame {
        match self.raft.apply(command.encode(), self.apply_timeout).await {
            Ok(ApplyOutput::Deleted { removed }) => Frame::Integer(removed as i64),
            Ok(_) => Frame::ok(),
            Err(RaftError::NotLeader { leader }) => self.redirect(leader),
            Err(e) => {
                warn!(node = %self.node_id, error = %e, "write failed");
                error_reply(e)
            }
        }
    }

    /// `MOVED -1 <addr>` pointing at the leader's client address
    fn redirect(&self, leader: Option<NodeId>) -> Frame {
        let lookup = leader
            .ok_or(ClusterError::NoLeader)
            .and_then(|id| client_addr(self.stable.as_ref(), &id));
        match lookup {
            Ok(addr) => {
                debug!(node = %self.node_id, leader = %addr, "redirecting write");
                Frame::error(format!("MOVED -1 {}", addr))
            }
            Err(e) => error_reply(e),
        }
    }
}

//! Key-value state machine
//!
//! Decodes committed `Command` payloads and applies them to a shared
//! `Store`. Reads bypass the log and go to the store directly, so the
//! store is shared between the state machine and the command layer.

use std::sync::Arc;

use tracing::error;

use super::command::{Command, Op};
use super::{ApplyError, ApplyOutput, ApplyResult, Snapshotable, StateMachine};
use crate::kv::{KvError, Store, Txn};

pub struct KvStateMachine {
    store: Arc<dyn Store>,
}

impl KvStateMachine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        KvStateMachine { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&mut self, payload: &[u8]) -> ApplyResult {
        let command = match Command::decode(payload) {
            Ok(command) => command,
            Err(e) => {
                // Every replica sees the same bytes, so every replica rejects
                // them the same way; the store stays untouched
                error!(error = %e, len = payload.len(), "rejecting malformed committed command");
                return Err(ApplyError::Decode(e.to_string()));
            }
        };

        match command.op {
            Op::Put => {
                let value = command.value.unwrap_or_default();
                self.store.put(&command.key, &value)?;
                Ok(ApplyOutput::Stored)
            }
            Op::Delete => {
                let mut removed = 0;
                self.store.txn(&mut |txn: &mut dyn Txn| {
                    if txn.exists(&command.key)? {
                        txn.delete(&command.key)?;
                        removed = 1;
                    } else {
                        removed = 0;
                    }
                    Ok(())
                })?;
                Ok(ApplyOutput::Deleted { removed })
            }
        }
    }
}

impl Snapshotable for KvStateMachine {
    fn snapshot(&self) -> Result<Vec<u8>, KvError> {
        self.store.snapshot()
    }

    fn restore(&mut self, data: &[u8]) -> Result<(), KvError> {
        self.store.restore(data)
    }
}

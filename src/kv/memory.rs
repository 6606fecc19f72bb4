//! In-memory key-value store
//!
//! Keys are kept in a `BTreeMap` so the snapshot of two stores with equal
//! content is byte-identical, whatever order the writes arrived in.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{KvError, Store, Txn};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// One key/value pair as written in a snapshot
#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    #[serde(rename = "k", with = "crate::encoding::base64_bytes")]
    key: Vec<u8>,
    #[serde(rename = "v", with = "crate::encoding::base64_bytes")]
    value: Vec<u8>,
}

/// Simple in-memory key-value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Map>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, KvError> {
        self.data.read().get(key).cloned().ok_or(KvError::KeyNotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.data
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or(KvError::KeyNotFound)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KvError> {
        Ok(self.data.read().contains_key(key))
    }

    fn snapshot(&self) -> Result<Vec<u8>, KvError> {
        // Copy under the read lock, serialize after releasing it
        let copy = self.data.read().clone();
        let entries: Vec<SnapshotEntry> = copy
            .into_iter()
            .map(|(key, value)| SnapshotEntry { key, value })
            .collect();
        serde_json::to_vec(&entries).map_err(|e| KvError::Snapshot(e.to_string()))
    }

    fn restore(&self, data: &[u8]) -> Result<(), KvError> {
        let entries: Vec<SnapshotEntry> =
            serde_json::from_slice(data).map_err(|e| KvError::Restore(e.to_string()))?;
        let restored: Map = entries.into_iter().map(|e| (e.key, e.value)).collect();
        *self.data.write() = restored;
        Ok(())
    }

    fn txn(&self, f: &mut dyn FnMut(&mut dyn Txn) -> Result<(), KvError>) -> Result<(), KvError> {
        let mut guard = self.data.write();
        let mut txn = MemoryTxn {
            base: &*guard,
            staged: BTreeMap::new(),
        };
        f(&mut txn)?;

        let staged = txn.staged;
        for (key, value) in staged {
            match value {
                Some(value) => {
                    guard.insert(key, value);
                }
                None => {
                    guard.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// Transaction view: reads see staged writes first, then the base map
struct MemoryTxn<'a> {
    base: &'a Map,
    /// `None` marks a staged delete
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Txn for MemoryTxn<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, KvError> {
        match self.staged.get(key) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(KvError::KeyNotFound),
            None => self.base.get(key).cloned().ok_or(KvError::KeyNotFound),
        }
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.staged.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KvError> {
        if !self.exists(key)? {
            return Err(KvError::KeyNotFound);
        }
        self.staged.insert(key.to_vec(), None);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KvError> {
        Ok(match self.staged.get(key) {
            Some(value) => value.is_some(),
            None => self.base.contains_key(key),
        })
    }
}

//! Stable metadata store
//!
//! A small durable key/value area for node metadata that lives outside the
//! replicated log, such as the node ID to client address mapping used for
//! redirects.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use super::file::{atomic_write, read_sealed_file, seal};
use super::StorageError;

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

pub trait StableStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Must be durable before returning
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStableStore {
    entries: RwLock<Entries>,
}

impl MemoryStableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StableStore for MemoryStableStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

/// Stable store persisted as one checksummed JSON record
///
/// The whole map is rewritten on every `set`; metadata is tiny and written
/// only at startup.
pub struct FileStableStore {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl FileStableStore {
    const FILE_NAME: &'static str = "stable";

    /// Open (or create) the store inside `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);

        let entries = match read_sealed_file(&path)? {
            None => Entries::new(),
            Some(json) => {
                let pairs: Vec<(Vec<u8>, Vec<u8>)> = serde_json::from_str(&json)
                    .map_err(|e| StorageError::Corruption(format!("invalid stable store: {}", e)))?;
                pairs.into_iter().collect()
            }
        };

        Ok(FileStableStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &Entries) -> Result<(), StorageError> {
        let pairs: Vec<(&Vec<u8>, &Vec<u8>)> = entries.iter().collect();
        let json = serde_json::to_string(&pairs)
            .map_err(|e| StorageError::Io(format!("serialization error: {}", e)))?;
        atomic_write(&self.path, format!("{}\n", seal(&json)).as_bytes())
    }
}

impl StableStore for FileStableStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_vec(), value.to_vec());
        if let Err(e) = self.persist(&entries) {
            // Keep memory consistent with disk
            match previous {
                Some(old) => entries.insert(key.to_vec(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

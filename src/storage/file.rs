//! File-based storage implementation for Raft persistent state
//!
//! Stores state in four files within a directory:
//! - `term` - Current term with checksum
//! - `voted_for` - Voted-for candidate ID (JSON `null` or string) with checksum
//! - `log` - Log entries (JSON lines format, each line has checksum)
//! - `snapshot` - Most recent snapshot (JSON with checksum)
//!
//! Every record is written as `{data} {crc32_hex}` so a torn write is
//! detected on the next load instead of being silently replayed.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Storage, StorageError};
use crate::core::membership::NodeId;
use crate::core::raft_core::LogEntry;
use crate::core::snapshot::Snapshot;

/// Format one checksummed record (without trailing newline)
pub(crate) fn seal(data: &str) -> String {
    format!("{} {:08x}", data, crc32fast::hash(data.as_bytes()))
}

/// Verify a `{data} {crc32_hex}` record and return the data portion
pub(crate) fn unseal<'a>(record: &'a str, what: &str) -> Result<&'a str, StorageError> {
    let (data, checksum) = record.rsplit_once(' ').ok_or_else(|| {
        StorageError::Corruption(format!("invalid format in {}: missing checksum", what))
    })?;

    let stored = u32::from_str_radix(checksum, 16)
        .map_err(|_| StorageError::Corruption(format!("invalid checksum format in {}", what)))?;
    let computed = crc32fast::hash(data.as_bytes());

    if stored != computed {
        return Err(StorageError::Corruption(format!(
            "checksum mismatch in {}: stored {:08x}, computed {:08x}",
            what, stored, computed
        )));
    }
    Ok(data)
}

/// Atomically replace a file (write to temp, fsync, rename)
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Read a single-record file, `None` when missing or empty
pub(crate) fn read_sealed_file(path: &Path) -> Result<Option<String>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let content = content.trim();
    if content.is_empty() {
        return Ok(None);
    }
    let what = path.display().to_string();
    Ok(Some(unseal(content, &what)?.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Io(format!("serialization error: {}", e)))
}

fn from_json<T: DeserializeOwned>(json: &str, what: &str) -> Result<T, StorageError> {
    serde_json::from_str(json).map_err(|e| StorageError::Corruption(format!("invalid {}: {}", what, e)))
}

/// File-based storage implementation
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a new FileStorage in the given directory
    /// Creates the directory if it doesn't exist
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FileStorage { dir })
    }

    fn term_path(&self) -> PathBuf {
        self.dir.join("term")
    }

    fn voted_for_path(&self) -> PathBuf {
        self.dir.join("voted_for")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("log")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("snapshot")
    }

    fn write_record(&self, path: &Path, data: &str) -> Result<(), StorageError> {
        atomic_write(path, format!("{}\n", seal(data)).as_bytes())
    }

    /// Rewrite the whole log file with the entries `keep` accepts
    fn rewrite_log(&self, keep: impl Fn(&LogEntry) -> bool) -> Result<(), StorageError> {
        let mut content = String::new();
        for entry in self.load_log()?.iter().filter(|e| keep(e)) {
            content.push_str(&seal(&to_json(entry)?));
            content.push('\n');
        }
        atomic_write(&self.log_path(), content.as_bytes())
    }
}

impl Storage for FileStorage {
    fn load_term(&self) -> Result<u64, StorageError> {
        match read_sealed_file(&self.term_path())? {
            None => Ok(0),
            Some(data) => data
                .parse()
                .map_err(|e| StorageError::Corruption(format!("invalid term: {}", e))),
        }
    }

    fn save_term(&mut self, term: u64) -> Result<(), StorageError> {
        self.write_record(&self.term_path(), &term.to_string())
    }

    fn load_voted_for(&self) -> Result<Option<NodeId>, StorageError> {
        match read_sealed_file(&self.voted_for_path())? {
            None => Ok(None),
            Some(data) => from_json(&data, "voted_for"),
        }
    }

    fn save_voted_for(&mut self, voted_for: Option<&str>) -> Result<(), StorageError> {
        self.write_record(&self.voted_for_path(), &to_json(&voted_for)?)
    }

    fn load_log(&self) -> Result<Vec<LogEntry>, StorageError> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut entries = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let what = format!("log line {}", line_num + 1);
            let json = unseal(&line, &what)?;
            entries.push(from_json(json, &what)?);
        }

        Ok(entries)
    }

    fn append_log_entries(&mut self, entries: &[LogEntry]) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;

        for entry in entries {
            writeln!(file, "{}", seal(&to_json(entry)?))?;
        }
        file.sync_all()?;
        Ok(())
    }

    fn truncate_log(&mut self, from_index: u64) -> Result<(), StorageError> {
        self.rewrite_log(|e| e.index < from_index)
    }

    fn compact_log(&mut self, before_index: u64) -> Result<(), StorageError> {
        self.rewrite_log(|e| e.index >= before_index)
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        match read_sealed_file(&self.snapshot_path())? {
            None => Ok(None),
            Some(json) => from_json(&json, "snapshot").map(Some),
        }
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.write_record(&self.snapshot_path(), &to_json(snapshot)?)
    }
}

//! Status store mirroring the script environment.
//!
//! The store holds one record per running daemon under its own key, plus
//! an index entry for each key variable pointing back at that record:
//!
//! ```text
//! linkd1234        -> "IFNAME=ppp0;DEVICE=/dev/ttyS0;..."
//! IFNAME=ppp0      -> "linkd1234"
//! ```

use std::collections::BTreeMap;

use crate::error::CoreError;

/// Backing store for session status records.
pub trait StatusStore {
    /// Write the full record under `record_key`.
    fn put_record(&mut self, record_key: &str, record: &str) -> Result<(), CoreError>;

    /// Index `key` (a `NAME=value` pair) to `record_key`.
    fn put_key(&mut self, key: &str, record_key: &str) -> Result<(), CoreError>;

    /// Remove an entry.
    fn remove(&mut self, key: &str) -> Result<(), CoreError>;
}

/// In-memory store, mostly for tests and single-process setups.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStatusStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StatusStore for MemoryStatusStore {
    fn put_record(&mut self, record_key: &str, record: &str) -> Result<(), CoreError> {
        self.entries.insert(record_key.to_string(), record.to_string());
        Ok(())
    }

    fn put_key(&mut self, key: &str, record_key: &str) -> Result<(), CoreError> {
        self.entries.insert(key.to_string(), record_key.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), CoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

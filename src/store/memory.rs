//! In-Memory Metadata Store
//!
//! Process-local implementation of [`MetadataStore`] with a global revision
//! counter backing compare-and-set. Used when no external KV store is
//! configured and throughout the tests.

use crate::domain::ports::{MetadataStore, Versioned};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-memory key/value store
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Versioned>>,
    /// Last issued revision
    revision: AtomicU64,
    /// Is backend available
    available: AtomicBool,
    /// Writes under this prefix fail (for testing)
    rejected_prefix: RwLock<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            available: AtomicBool::new(true),
            rejected_prefix: RwLock::new(None),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Set availability (for testing)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Check if available
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Fail writes to keys under `prefix`; `None` accepts every write again
    /// (for testing)
    pub fn reject_writes_under(&self, prefix: Option<&str>) {
        *self.rejected_prefix.write() = prefix.map(str::to_string);
    }

    fn ensure_available(&self) -> Result<()> {
        if !self.is_available() {
            return Err(Error::Store("metadata store unavailable".to_string()));
        }
        Ok(())
    }

    fn ensure_writable(&self, key: &str) -> Result<()> {
        self.ensure_available()?;
        match self.rejected_prefix.read().as_deref() {
            Some(prefix) if key.starts_with(prefix) => {
                Err(Error::Store(format!("write to {} rejected", key)))
            }
            _ => Ok(()),
        }
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        self.ensure_available()?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64> {
        self.ensure_writable(key)?;
        let mut entries = self.entries.write();
        let version = self.next_revision();
        entries.insert(key.to_string(), Versioned { value, version });
        Ok(version)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Bytes,
    ) -> Result<u64> {
        self.ensure_writable(key)?;
        let mut entries = self.entries.write();
        let current = entries.get(key).map(|v| v.version);
        if current != expected {
            return Err(Error::StoreConflict {
                key: key.to_string(),
            });
        }
        let version = self.next_revision();
        entries.insert(key.to_string(), Versioned { value, version });
        Ok(version)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>> {
        self.ensure_available()?;
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.is_available())
    }
}

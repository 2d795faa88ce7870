//! # Storage Module
//!
//! Content-addressed memoization of expensive, input-stable computations
//! (contour extraction, density maps).
//!
//! - [`CacheStore`]: byte store keyed by `(namespace, key)`
//! - [`MemoryStore`]: process-local store
//! - [`RedbStore`]: persistent store in a redb database
//! - [`Memoizer`]: at-most-once computation per key on top of a store
//! - [`ContentHasher`]: BLAKE3 keys over the inputs of a computation

mod memo;
mod redb_store;

pub use memo::Memoizer;
pub use redb_store::RedbStore;

use crate::MatchError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

// =============================================================================
// STORE TRAIT
// =============================================================================

/// A byte store for memoized values.
///
/// Implementations must be safe to share between worker threads.
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Load the bytes stored under `key`, if any.
    fn load(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, MatchError>;

    /// Store `bytes` under `key`, replacing any previous value.
    fn store(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), MatchError>;
}

/// In-memory store, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<usize, MatchError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, MatchError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), Vec<u8>>>, MatchError> {
        self.entries
            .lock()
            .map_err(|_| MatchError::Cache("memory store lock poisoned".to_string()))
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, MatchError> {
        Ok(self
            .lock()?
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn store(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), MatchError> {
        self.lock()?
            .insert((namespace.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }
}

// =============================================================================
// CONTENT KEYS
// =============================================================================

/// BLAKE3 hex digest of `bytes`.
#[must_use]
pub fn content_key(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Incremental BLAKE3 key over typed inputs.
#[derive(Debug, Default)]
pub struct ContentHasher {
    hasher: blake3::Hasher,
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(&value.to_le_bytes());
        self
    }

    pub fn update_f64(&mut self, value: f64) -> &mut Self {
        self.hasher.update(&value.to_bits().to_le_bytes());
        self
    }

    pub fn update_str(&mut self, value: &str) -> &mut Self {
        self.update_u64(value.len() as u64);
        self.hasher.update(value.as_bytes());
        self
    }

    #[must_use]
    pub fn finalize(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

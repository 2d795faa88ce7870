//! # Memoizer
//!
//! At-most-once computation per key, shared by worker threads.
//!
//! Each key owns a once-cell: concurrent callers asking for the same key
//! block on that cell while one of them loads or computes the value. The
//! backing [`CacheStore`] is consulted first and filled afterwards, so a
//! persistent store carries results across runs.

use super::CacheStore;
use crate::MatchError;
use crate::formats::{decode_payload, encode_payload};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type Cell<V> = Arc<OnceCell<Arc<V>>>;

/// Memoized values of one kind, e.g. contour regions.
pub struct Memoizer<V> {
    namespace: &'static str,
    store: Arc<dyn CacheStore>,
    cells: Mutex<BTreeMap<String, Cell<V>>>,
}

impl<V> std::fmt::Debug for Memoizer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoizer")
            .field("namespace", &self.namespace)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<V> Memoizer<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    #[must_use]
    pub fn new(namespace: &'static str, store: Arc<dyn CacheStore>) -> Self {
        Self {
            namespace,
            store,
            cells: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Return the value for `key`, computing it with `compute` at most once.
    ///
    /// A failed computation leaves the key empty; the next caller retries.
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<Arc<V>, MatchError>
    where
        F: FnOnce() -> Result<V, MatchError>,
    {
        let cell = {
            let mut cells = self
                .cells
                .lock()
                .map_err(|_| MatchError::Cache("memoizer lock poisoned".to_string()))?;
            Arc::clone(cells.entry(key.to_string()).or_default())
        };

        cell.get_or_try_init(|| self.load_or_compute(key, compute))
            .map(Arc::clone)
    }

    fn load_or_compute<F>(&self, key: &str, compute: F) -> Result<Arc<V>, MatchError>
    where
        F: FnOnce() -> Result<V, MatchError>,
    {
        match self.store.load(self.namespace, key) {
            Ok(Some(bytes)) => match decode_payload::<V>(&bytes) {
                Ok(value) => {
                    tracing::debug!(namespace = self.namespace, key, "cache hit");
                    return Ok(Arc::new(value));
                }
                Err(e) => {
                    tracing::warn!(namespace = self.namespace, key, "discarding cached value: {}", e);
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(namespace = self.namespace, key, "cache read failed: {}", e);
            }
        }

        let value = compute()?;
        match encode_payload(&value) {
            Ok(bytes) => {
                if let Err(e) = self.store.store(self.namespace, key, &bytes) {
                    tracing::warn!(namespace = self.namespace, key, "cache write failed: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!(namespace = self.namespace, key, "cannot encode value: {}", e);
            }
        }
        Ok(Arc::new(value))
    }
}

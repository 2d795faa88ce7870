//! # redb-backed Cache Store
//!
//! Persists memoized payloads across runs in a single redb table keyed by
//! `"<namespace>/<content key>"`. Writes are one transaction each; readers
//! never block each other.

use super::CacheStore;
use crate::MatchError;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};

/// Table for cached payloads: "namespace/key" -> header + postcard bytes
const PAYLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("payloads");

/// A persistent cache store.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a cache database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MatchError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(|e| MatchError::Cache(e.to_string()))?;

        // Create the table up front so read transactions never miss it.
        let write_txn = db
            .begin_write()
            .map_err(|e| MatchError::Cache(e.to_string()))?;
        let _ = write_txn
            .open_table(PAYLOADS)
            .map_err(|e| MatchError::Cache(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| MatchError::Cache(e.to_string()))?;

        tracing::debug!(path = %path.display(), "opened cache store");
        Ok(Self { db, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table_key(namespace: &str, key: &str) -> String {
        format!("{namespace}/{key}")
    }
}

impl CacheStore for RedbStore {
    fn load(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, MatchError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| MatchError::Cache(e.to_string()))?;
        let table = read_txn
            .open_table(PAYLOADS)
            .map_err(|e| MatchError::Cache(e.to_string()))?;
        let value = table
            .get(Self::table_key(namespace, key).as_str())
            .map_err(|e| MatchError::Cache(e.to_string()))?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn store(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), MatchError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| MatchError::Cache(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(PAYLOADS)
                .map_err(|e| MatchError::Cache(e.to_string()))?;
            table
                .insert(Self::table_key(namespace, key).as_str(), bytes)
                .map_err(|e| MatchError::Cache(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| MatchError::Cache(e.to_string()))?;
        Ok(())
    }
}

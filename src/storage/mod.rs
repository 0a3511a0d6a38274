//! Storage layer
//!
//! A single key-value keyspace partitioned by fixed 2-byte prefixes, backed by
//! one of the [`database`] engines (redb, sled or in-memory).

pub mod database;
pub mod hashing;

use crate::config::StorageConfig;
use anyhow::{Context, Result};
use database::{create_database, default_backend, Database, DatabaseBackend, Tree};
pub use database::BatchOp;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Key prefixes. Every stored key begins with exactly one of these.
pub mod prefixes {
    /// Serialized Merkle node list, keyed by height
    pub const MERKLE_TREE_HEIGHT: [u8; 2] = *b"mt";
    /// Merkle root hash, keyed by height
    pub const MERKLE_ROOT_HEIGHT: [u8; 2] = *b"mr";
    /// Flat Merkle leaf list, keyed by height
    pub const MERKLE_LEAVES_HEIGHT: [u8; 2] = *b"ml";
    /// Serialized Merkle node list, keyed by address
    pub const MERKLE_TREE_ADDRESS: [u8; 2] = *b"at";
    /// Merkle root hash, keyed by address
    pub const MERKLE_ROOT_ADDRESS: [u8; 2] = *b"ar";
    /// Flat Merkle leaf list, keyed by address
    pub const MERKLE_LEAVES_ADDRESS: [u8; 2] = *b"al";

    /// `prefix || suffix`
    pub fn key(prefix: [u8; 2], suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(2 + suffix.len());
        key.extend_from_slice(&prefix);
        key.extend_from_slice(suffix);
        key
    }
}

const STATE_TREE: &str = "state";

/// Key-value store handed to components that persist state
#[derive(Clone)]
pub struct Storage {
    db: Arc<dyn Database>,
    state: Arc<dyn Tree>,
}

impl Storage {
    /// Open persistent storage in `data_dir` with the default backend
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Self::with_backend(data_dir, default_backend())
    }

    /// Open storage with an explicit backend
    pub fn with_backend<P: AsRef<Path>>(data_dir: P, backend: DatabaseBackend) -> Result<Self> {
        let db: Arc<dyn Database> = Arc::from(
            create_database(data_dir.as_ref(), backend)
                .with_context(|| format!("opening {:?} storage", backend))?,
        );
        let state = Arc::from(db.open_tree(STATE_TREE)?);
        info!(
            "Storage opened at {} ({:?})",
            data_dir.as_ref().display(),
            backend
        );
        Ok(Self { db, state })
    }

    /// Volatile storage (tests, nodes without a data directory)
    pub fn in_memory() -> Result<Self> {
        Self::with_backend("", DatabaseBackend::Memory)
    }

    /// Open storage described by configuration; in-memory when absent
    pub fn from_config(config: Option<&StorageConfig>) -> Result<Self> {
        match config {
            Some(c) => {
                let backend = c.backend.map(DatabaseBackend::from).unwrap_or_else(default_backend);
                Self::with_backend(&c.data_dir, backend)
            }
            None => Self::in_memory(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.state.get(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.state.insert(key, value)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.state.remove(key)
    }

    pub fn is_key(&self, key: &[u8]) -> Result<bool> {
        self.state.contains_key(key)
    }

    /// Apply `ops` as one atomic write
    pub fn write_batch(&self, ops: &[BatchOp<'_>]) -> Result<()> {
        self.state.apply_batch(ops)
    }

    /// All entries under `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.state.scan_prefix(prefix)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_keys_partition_the_keyspace() {
        let storage = Storage::in_memory().unwrap();
        let root_key = prefixes::key(prefixes::MERKLE_ROOT_HEIGHT, &7u64.to_be_bytes());
        let leaves_key = prefixes::key(prefixes::MERKLE_LEAVES_HEIGHT, &7u64.to_be_bytes());

        storage.put(&root_key, b"root").unwrap();
        storage.put(&leaves_key, b"leaves").unwrap();

        let roots = storage.scan_prefix(&prefixes::MERKLE_ROOT_HEIGHT).unwrap();
        assert_eq!(roots, vec![(root_key.clone(), b"root".to_vec())]);

        storage.delete(&root_key).unwrap();
        assert!(!storage.is_key(&root_key).unwrap());
        assert!(storage.is_key(&leaves_key).unwrap());
    }

    #[test]
    fn test_from_config_without_section_is_in_memory() {
        let storage = Storage::from_config(None).unwrap();
        storage.put(b"xx", b"1").unwrap();
        assert_eq!(storage.get(b"xx").unwrap(), Some(b"1".to_vec()));
    }
}

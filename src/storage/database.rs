//! Database abstraction layer
//!
//! Provides a unified interface for different database backends (sled, redb,
//! in-memory). Persistent engines are selected via feature flags.

use anyhow::Result;
use std::path::Path;

/// Database abstraction trait
///
/// Provides a unified interface for key-value storage operations
/// that can be implemented by different backends.
pub trait Database: Send + Sync {
    /// Open a named tree/table
    fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>>;

    /// Flush all pending writes
    fn flush(&self) -> Result<()>;
}

/// Tree/Table abstraction trait
///
/// Represents a named collection of key-value pairs within a database.
pub trait Tree: Send + Sync {
    /// Insert a key-value pair
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a key-value pair
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists
    fn contains_key(&self, key: &[u8]) -> Result<bool>;

    /// Get number of entries
    fn len(&self) -> Result<usize>;

    /// Check if tree is empty
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All key-value pairs whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every operation or none of them
    fn apply_batch(&self, ops: &[BatchOp<'_>]) -> Result<()>;
}

/// One write of an atomic batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp<'a> {
    Put(&'a [u8], &'a [u8]),
    Delete(&'a [u8]),
}

/// Database backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sled,
    Redb,
    Memory,
}

impl From<crate::config::StorageBackendConfig> for DatabaseBackend {
    fn from(value: crate::config::StorageBackendConfig) -> Self {
        use crate::config::StorageBackendConfig;
        match value {
            StorageBackendConfig::Sled => DatabaseBackend::Sled,
            StorageBackendConfig::Redb => DatabaseBackend::Redb,
            StorageBackendConfig::Memory => DatabaseBackend::Memory,
        }
    }
}

/// Create a database instance based on backend type
pub fn create_database<P: AsRef<Path>>(
    data_dir: P,
    backend: DatabaseBackend,
) -> Result<Box<dyn Database>> {
    match backend {
        #[cfg(feature = "sled")]
        DatabaseBackend::Sled => Ok(Box::new(sled_impl::SledDatabase::new(data_dir)?)),
        #[cfg(not(feature = "sled"))]
        DatabaseBackend::Sled => {
            let _ = data_dir;
            Err(anyhow::anyhow!(
                "Sled backend not available (feature not enabled)"
            ))
        }
        #[cfg(feature = "redb")]
        DatabaseBackend::Redb => Ok(Box::new(redb_impl::RedbDatabase::new(data_dir)?)),
        #[cfg(not(feature = "redb"))]
        DatabaseBackend::Redb => {
            let _ = data_dir;
            Err(anyhow::anyhow!(
                "Redb backend not available (feature not enabled)"
            ))
        }
        DatabaseBackend::Memory => Ok(Box::new(memory_impl::MemoryDatabase::new())),
    }
}

/// Get default persistent backend
///
/// Returns the preferred backend (redb if available, otherwise sled, otherwise memory).
pub fn default_backend() -> DatabaseBackend {
    #[cfg(feature = "redb")]
    {
        DatabaseBackend::Redb
    }
    #[cfg(all(not(feature = "redb"), feature = "sled"))]
    {
        DatabaseBackend::Sled
    }
    #[cfg(all(not(feature = "redb"), not(feature = "sled")))]
    {
        DatabaseBackend::Memory
    }
}

// Sled implementation
#[cfg(feature = "sled")]
mod sled_impl {
    use super::{BatchOp, Database, Tree};
    use anyhow::Result;
    use sled::Db;
    use std::path::Path;
    use std::sync::Arc;

    pub struct SledDatabase {
        db: Arc<Db>,
    }

    impl SledDatabase {
        pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
            let db = sled::open(data_dir)?;
            Ok(Self { db: Arc::new(db) })
        }
    }

    impl Database for SledDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let tree = self.db.open_tree(name)?;
            Ok(Box::new(SledTree {
                tree: Arc::new(tree),
            }))
        }

        fn flush(&self) -> Result<()> {
            self.db.flush()?;
            Ok(())
        }
    }

    struct SledTree {
        tree: Arc<sled::Tree>,
    }

    impl Tree for SledTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.tree.insert(key, value)?;
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.tree.get(key)?.map(|v| v.to_vec()))
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            self.tree.remove(key)?;
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            Ok(self.tree.contains_key(key)?)
        }

        fn len(&self) -> Result<usize> {
            Ok(self.tree.len())
        }

        fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
            self.tree
                .scan_prefix(prefix)
                .map(|item| {
                    item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                        .map_err(|e| anyhow::anyhow!("Sled iteration error: {}", e))
                })
                .collect()
        }

        fn apply_batch(&self, ops: &[BatchOp<'_>]) -> Result<()> {
            let mut batch = sled::Batch::default();
            for op in ops {
                match *op {
                    BatchOp::Put(key, value) => batch.insert(key, value),
                    BatchOp::Delete(key) => batch.remove(key),
                }
            }
            self.tree.apply_batch(batch)?;
            Ok(())
        }
    }
}

// Redb implementation
#[cfg(feature = "redb")]
mod redb_impl {
    use super::{BatchOp, Database, Tree};
    use anyhow::Result;
    use redb::{Database as RedbDb, ReadableTable, TableDefinition};
    use std::path::Path;
    use std::sync::Arc;

    // Redb requires static table definitions
    static STATE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("state");

    pub struct RedbDatabase {
        db: Arc<RedbDb>,
    }

    impl RedbDatabase {
        pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
            std::fs::create_dir_all(data_dir.as_ref())?;
            let db_path = data_dir.as_ref().join("redb.db");
            let db = RedbDb::create(&db_path)?;

            // Create the table up front so read transactions never see it missing
            let write_txn = db.begin_write()?;
            {
                write_txn.open_table(STATE_TABLE)?;
            }
            write_txn.commit()?;

            Ok(Self { db: Arc::new(db) })
        }

        fn get_table_def(
            &self,
            name: &str,
        ) -> Option<&'static TableDefinition<'static, &'static [u8], &'static [u8]>> {
            match name {
                "state" => Some(&STATE_TABLE),
                _ => None,
            }
        }
    }

    impl Database for RedbDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let table_def = self.get_table_def(name).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown table name: {}. Redb requires pre-defined tables.",
                    name
                )
            })?;

            Ok(Box::new(RedbTree {
                db: Arc::clone(&self.db),
                table_def,
            }))
        }

        fn flush(&self) -> Result<()> {
            // Redb flushes on commit; an empty write transaction forces a sync point
            let write_txn = self.db.begin_write()?;
            write_txn.commit()?;
            Ok(())
        }
    }

    struct RedbTree {
        db: Arc<RedbDb>,
        table_def: &'static TableDefinition<'static, &'static [u8], &'static [u8]>,
    }

    impl Tree for RedbTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(*self.table_def)?;
                table.insert(key, value)?;
            }
            write_txn.commit()?;
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            let result = table.get(key)?.map(|v| v.value().to_vec());
            Ok(result)
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(*self.table_def)?;
                table.remove(key)?;
            }
            write_txn.commit()?;
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            let result = table.get(key)?.is_some();
            Ok(result)
        }

        fn len(&self) -> Result<usize> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            Ok(table.len()? as usize)
        }

        fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;

            // The read transaction must outlive the range, so results are collected
            let mut items = Vec::new();
            for item in table.range(prefix..)? {
                let (key, value) = item?;
                let key = key.value();
                if !key.starts_with(prefix) {
                    break;
                }
                items.push((key.to_vec(), value.value().to_vec()));
            }
            Ok(items)
        }

        fn apply_batch(&self, ops: &[BatchOp<'_>]) -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(*self.table_def)?;
                for op in ops {
                    match *op {
                        BatchOp::Put(key, value) => {
                            table.insert(key, value)?;
                        }
                        BatchOp::Delete(key) => {
                            table.remove(key)?;
                        }
                    }
                }
            }
            write_txn.commit()?;
            Ok(())
        }
    }
}

// In-memory implementation
mod memory_impl {
    use super::{BatchOp, Database, Tree};
    use anyhow::Result;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex, PoisonError, RwLock};

    type Table = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

    /// Volatile backend; trees opened under the same name share contents.
    #[derive(Default)]
    pub struct MemoryDatabase {
        trees: Mutex<HashMap<String, Table>>,
    }

    impl MemoryDatabase {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Database for MemoryDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let mut trees = self.trees.lock().unwrap_or_else(PoisonError::into_inner);
            let table = trees.entry(name.to_string()).or_default();
            Ok(Box::new(MemoryTree {
                table: Arc::clone(table),
            }))
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    struct MemoryTree {
        table: Table,
    }

    impl Tree for MemoryTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.table
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self
                .table
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned())
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            self.table
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            Ok(self
                .table
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(key))
        }

        fn len(&self) -> Result<usize> {
            Ok(self.table.read().unwrap_or_else(PoisonError::into_inner).len())
        }

        fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            Ok(table
                .range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }

        fn apply_batch(&self, ops: &[BatchOp<'_>]) -> Result<()> {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            for op in ops {
                match *op {
                    BatchOp::Put(key, value) => {
                        table.insert(key.to_vec(), value.to_vec());
                    }
                    BatchOp::Delete(key) => {
                        table.remove(key);
                    }
                }
            }
            Ok(())
        }
    }
}

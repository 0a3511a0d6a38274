//! Storage and Merkle persistence tests

use pqchain_node::config::{StorageBackendConfig, StorageConfig};
use pqchain_node::merkle::{MerkleStore, MerkleTree, TreeKey};
use pqchain_node::storage::database::DatabaseBackend;
use pqchain_node::storage::prefixes;
use pqchain_node::Storage;
use tempfile::TempDir;

#[test]
fn test_prefix_scan_stays_within_prefix() {
    let storage = Storage::in_memory().unwrap();
    storage.put(&prefixes::key(*b"mr", &[1]), b"one").unwrap();
    storage.put(&prefixes::key(*b"mr", &[2]), b"two").unwrap();
    storage.put(&prefixes::key(*b"ms", &[1]), b"other").unwrap();

    let found = storage.scan_prefix(b"mr").unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|(k, _)| k.starts_with(b"mr")));

    storage.delete(&prefixes::key(*b"mr", &[1])).unwrap();
    assert!(!storage.is_key(&prefixes::key(*b"mr", &[1])).unwrap());
}

#[cfg(feature = "redb")]
#[test]
fn test_merkle_tree_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let hashes: Vec<[u8; 32]> = (0u8..7).map(|b| [b; 32]).collect();
    let tree = MerkleTree::build(&hashes);

    {
        let storage = Storage::with_backend(temp_dir.path(), DatabaseBackend::Redb).unwrap();
        MerkleStore::new(storage.clone())
            .store(&tree, &TreeKey::Height(3))
            .unwrap();
        storage.flush().unwrap();
    }

    let storage = Storage::with_backend(temp_dir.path(), DatabaseBackend::Redb).unwrap();
    let store = MerkleStore::new(storage);
    assert_eq!(store.load(&TreeKey::Height(3)).unwrap().unwrap(), tree);
    assert_eq!(store.find_height_of_hash(&hashes[6], 3).unwrap(), Some(3));
}

#[cfg(feature = "sled")]
#[test]
fn test_sled_backend_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig {
        data_dir: temp_dir.path().to_path_buf(),
        backend: Some(StorageBackendConfig::Sled),
    };
    let storage = Storage::from_config(Some(&config)).unwrap();
    storage.put(b"mtkey", b"value").unwrap();
    assert_eq!(storage.get(b"mtkey").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn test_memory_backend_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig {
        data_dir: temp_dir.path().to_path_buf(),
        backend: Some(StorageBackendConfig::Memory),
    };
    let storage = Storage::from_config(Some(&config)).unwrap();
    assert!(storage.get(b"missing").unwrap().is_none());
    storage.put(b"k", b"v").unwrap();
    assert!(storage.is_key(b"k").unwrap());
}

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use newsdb_migrate::{KeyDef, PartitionSchema};

use crate::traits::{Backend, BackendError, Transactional};

#[derive(Debug, Clone, Default)]
struct Tables {
    version: u32,
    partitions: BTreeMap<String, KeyDef>,
    records: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

/// In-memory storage backend.
///
/// All data is stored in `BTreeMap`s and never touches disk. Clones share
/// the same tables, so a database survives being closed and reopened for as
/// long as one clone is alive. Ideal for testing and for a degraded mode
/// when persistent storage is unavailable.
///
/// # Example
///
/// ```
/// use newsdb_store::{Backend, KeyDef, MemoryBackend};
///
/// let mut backend = MemoryBackend::new();
/// backend.create_partition("settings", &KeyDef::External).unwrap();
/// backend.put("settings", "1theme", b"\"dark\"").unwrap();
///
/// let data = backend.get("settings", "1theme").unwrap().unwrap();
/// assert_eq!(data, b"\"dark\"");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all partitions.
    pub fn record_count(&self) -> Result<usize, BackendError> {
        Ok(self.lock()?.records.values().map(|r| r.len()).sum())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, BackendError> {
        self.tables.lock().map_err(|_| BackendError::LockPoisoned)
    }
}

fn partition<'a>(
    tables: &'a Tables,
    name: &str,
) -> Result<&'a BTreeMap<String, Vec<u8>>, BackendError> {
    tables
        .records
        .get(name)
        .ok_or_else(|| BackendError::UnknownPartition(name.to_string()))
}

fn partition_mut<'a>(
    tables: &'a mut Tables,
    name: &str,
) -> Result<&'a mut BTreeMap<String, Vec<u8>>, BackendError> {
    tables
        .records
        .get_mut(name)
        .ok_or_else(|| BackendError::UnknownPartition(name.to_string()))
}

impl Backend for MemoryBackend {
    fn stored_version(&self) -> Result<u32, BackendError> {
        Ok(self.lock()?.version)
    }

    fn set_version(&mut self, version: u32) -> Result<(), BackendError> {
        self.lock()?.version = version;
        Ok(())
    }

    fn partitions(&self) -> Result<Vec<PartitionSchema>, BackendError> {
        Ok(self
            .lock()?
            .partitions
            .iter()
            .map(|(name, key)| PartitionSchema {
                name: name.clone(),
                key: key.clone(),
            })
            .collect())
    }

    fn create_partition(&mut self, name: &str, key: &KeyDef) -> Result<(), BackendError> {
        let mut tables = self.lock()?;
        if tables.partitions.contains_key(name) {
            return Err(BackendError::PartitionExists(name.to_string()));
        }
        tables.partitions.insert(name.to_string(), key.clone());
        tables.records.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    fn delete_partition(&mut self, name: &str) -> Result<(), BackendError> {
        let mut tables = self.lock()?;
        if tables.partitions.remove(name).is_none() {
            return Err(BackendError::UnknownPartition(name.to_string()));
        }
        tables.records.remove(name);
        Ok(())
    }

    fn get(&self, partition_name: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let tables = self.lock()?;
        Ok(partition(&tables, partition_name)?.get(key).cloned())
    }

    fn put(&mut self, partition_name: &str, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let mut tables = self.lock()?;
        partition_mut(&mut tables, partition_name)?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, partition_name: &str, key: &str) -> Result<bool, BackendError> {
        let mut tables = self.lock()?;
        Ok(partition_mut(&mut tables, partition_name)?
            .remove(key)
            .is_some())
    }

    fn scan(&self, partition_name: &str) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        let tables = self.lock()?;
        Ok(partition(&tables, partition_name)?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn count(&self, partition_name: &str) -> Result<u64, BackendError> {
        let tables = self.lock()?;
        Ok(partition(&tables, partition_name)?.len() as u64)
    }

    fn clear(&mut self, partition_name: &str) -> Result<u64, BackendError> {
        let mut tables = self.lock()?;
        let records = partition_mut(&mut tables, partition_name)?;
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }
}

impl Transactional for MemoryBackend {
    fn transaction<F, R, E>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Self) -> Result<R, E>,
        E: From<BackendError>,
    {
        let saved = self.lock()?.clone();
        match f(self) {
            Ok(result) => Ok(result),
            Err(e) => {
                if let Ok(mut tables) = self.lock() {
                    *tables = saved;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_with(partitions: &[&str]) -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        for name in partitions {
            backend.create_partition(name, &KeyDef::External).unwrap();
        }
        backend
    }

    #[test]
    fn fresh_backend_is_version_zero() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.stored_version().unwrap(), 0);
        assert!(backend.partitions().unwrap().is_empty());
    }

    #[test]
    fn record_put_get_delete() {
        let mut backend = backend_with(&["ns"]);

        backend.put("ns", "k1", b"hello").unwrap();
        assert_eq!(backend.get("ns", "k1").unwrap(), Some(b"hello".to_vec()));

        backend.put("ns", "k1", b"world").unwrap();
        assert_eq!(backend.get("ns", "k1").unwrap(), Some(b"world".to_vec()));

        assert!(backend.delete("ns", "k1").unwrap());
        assert!(!backend.delete("ns", "k1").unwrap());
        assert_eq!(backend.get("ns", "k1").unwrap(), None);
    }

    #[test]
    fn partition_isolation() {
        let mut backend = backend_with(&["a", "b"]);
        backend.put("a", "k1", b"alpha").unwrap();
        backend.put("b", "k1", b"beta").unwrap();

        assert_eq!(backend.get("a", "k1").unwrap(), Some(b"alpha".to_vec()));
        assert_eq!(backend.get("b", "k1").unwrap(), Some(b"beta".to_vec()));
        assert_eq!(backend.record_count().unwrap(), 2);
    }

    #[test]
    fn unknown_partition_rejected() {
        let mut backend = MemoryBackend::new();
        assert!(matches!(
            backend.put("ghost", "k", b"v"),
            Err(BackendError::UnknownPartition(_))
        ));
        assert!(matches!(
            backend.get("ghost", "k"),
            Err(BackendError::UnknownPartition(_))
        ));
    }

    #[test]
    fn scan_in_key_order() {
        let mut backend = backend_with(&["ns"]);
        backend.put("ns", "b", b"2").unwrap();
        backend.put("ns", "a", b"1").unwrap();
        backend.put("ns", "c", b"3").unwrap();

        let keys: Vec<String> = backend.scan("ns").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(backend.count("ns").unwrap(), 3);
    }

    #[test]
    fn delete_partition_drops_records() {
        let mut backend = backend_with(&["ns"]);
        backend.put("ns", "a", b"1").unwrap();
        backend.delete_partition("ns").unwrap();

        backend.create_partition("ns", &KeyDef::path("link")).unwrap();
        assert_eq!(backend.count("ns").unwrap(), 0);
        assert_eq!(
            backend.partitions().unwrap(),
            vec![PartitionSchema {
                name: "ns".into(),
                key: KeyDef::path("link")
            }]
        );
    }

    #[test]
    fn create_existing_partition_fails() {
        let mut backend = backend_with(&["ns"]);
        assert!(matches!(
            backend.create_partition("ns", &KeyDef::External),
            Err(BackendError::PartitionExists(_))
        ));
    }

    #[test]
    fn clear_keeps_partition() {
        let mut backend = backend_with(&["ns"]);
        backend.put("ns", "a", b"1").unwrap();
        backend.put("ns", "b", b"2").unwrap();
        assert_eq!(backend.clear("ns").unwrap(), 2);
        assert_eq!(backend.count("ns").unwrap(), 0);
        assert_eq!(backend.partitions().unwrap().len(), 1);
    }

    #[test]
    fn transaction_commit() {
        let mut backend = MemoryBackend::new();
        backend
            .transaction(|b| -> Result<(), BackendError> {
                b.create_partition("ns", &KeyDef::External)?;
                b.set_version(1)
            })
            .unwrap();

        assert_eq!(backend.stored_version().unwrap(), 1);
        assert_eq!(backend.partitions().unwrap().len(), 1);
    }

    #[test]
    fn transaction_rollback() {
        let mut backend = backend_with(&["ns"]);
        backend.put("ns", "k1", b"original").unwrap();

        let result: Result<(), BackendError> = backend.transaction(|b| {
            b.put("ns", "k1", b"modified")?;
            b.delete_partition("ns")?;
            b.set_version(9)?;
            Err(BackendError::Corrupt("simulated".into()))
        });

        assert!(result.is_err());
        assert_eq!(backend.stored_version().unwrap(), 0);
        assert_eq!(backend.get("ns", "k1").unwrap(), Some(b"original".to_vec()));
    }

    #[test]
    fn clones_share_tables() {
        let mut backend = backend_with(&["ns"]);
        let other = backend.clone();
        backend.put("ns", "k", b"v").unwrap();
        assert_eq!(other.get("ns", "k").unwrap(), Some(b"v".to_vec()));
    }
}

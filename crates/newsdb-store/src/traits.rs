use newsdb_migrate::{KeyDef, PartitionSchema};
use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// An error from SQLite.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Filesystem error while opening storage.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The partition does not exist.
    #[error("unknown partition `{0}`")]
    UnknownPartition(String),
    /// The partition already exists.
    #[error("partition `{0}` already exists")]
    PartitionExists(String),
    /// Stored data could not be interpreted.
    #[error("corrupt database: {0}")]
    Corrupt(String),
    /// A lock guarding shared state was poisoned.
    #[error("backend lock poisoned")]
    LockPoisoned,
}

/// Core trait for partitioned storage engines.
///
/// Every backend implements this trait. Records are opaque bytes addressed by
/// `(partition, key)`, where `key` is already in the order-preserving encoded
/// form produced by [`Key::encode`](crate::Key::encode). The engine tracks
/// which partitions exist, their key definitions, and the stored schema
/// version. Key extraction and JSON handling live in [`Store`](crate::Store).
pub trait Backend: Send + 'static {
    /// Version recorded by the last committed upgrade. 0 for a fresh database.
    fn stored_version(&self) -> Result<u32, BackendError>;

    /// Record a new schema version.
    fn set_version(&mut self, version: u32) -> Result<(), BackendError>;

    /// All partitions, ordered by name.
    fn partitions(&self) -> Result<Vec<PartitionSchema>, BackendError>;

    /// Define a new partition.
    fn create_partition(&mut self, name: &str, key: &KeyDef) -> Result<(), BackendError>;

    /// Remove a partition and every record in it.
    fn delete_partition(&mut self, name: &str) -> Result<(), BackendError>;

    /// Retrieve a record. Returns `None` if the key does not exist.
    fn get(&self, partition: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Insert or replace a record.
    fn put(&mut self, partition: &str, key: &str, value: &[u8]) -> Result<(), BackendError>;

    /// Remove a record. Returns whether it existed.
    fn delete(&mut self, partition: &str, key: &str) -> Result<bool, BackendError>;

    /// All records of a partition in key order.
    fn scan(&self, partition: &str) -> Result<Vec<(String, Vec<u8>)>, BackendError>;

    /// Number of records in a partition.
    fn count(&self, partition: &str) -> Result<u64, BackendError> {
        Ok(self.scan(partition)?.len() as u64)
    }

    /// Remove every record of a partition, keeping the partition.
    /// Returns the number of records removed.
    fn clear(&mut self, partition: &str) -> Result<u64, BackendError>;

    /// Push buffered state to durable storage.
    fn flush(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Backends that can group changes into an atomic transaction.
pub trait Transactional: Backend {
    /// Execute a closure within an atomic transaction.
    /// If the closure returns `Err`, all changes are rolled back.
    fn transaction<F, R, E>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Self) -> Result<R, E>,
        E: From<BackendError>;
}

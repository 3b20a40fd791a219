use newsdb_migrate::MigrationError;
use thiserror::Error;

use crate::key::KeyError;
use crate::traits::BackendError;

/// Error type for [`Store`](crate::Store) and
/// [`StoreRegistry`](crate::StoreRegistry) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested version is lower than the stored one. Stores never
    /// downgrade.
    #[error("database `{name}` is at v{stored}, cannot open it at v{requested}")]
    Version {
        name: String,
        requested: u32,
        stored: u32,
    },
    /// The upgrade failed; nothing from it was committed.
    #[error("migrating `{name}` to v{version} failed: {source}")]
    Migration {
        name: String,
        version: u32,
        #[source]
        source: MigrationError,
    },
    /// The storage engine could not be opened at all.
    #[error("storage for `{name}` is unavailable: {reason}")]
    StorageUnavailable { name: String, reason: String },
    /// The target version is not one the plan can produce.
    #[error("invalid target version: {0}")]
    InvalidVersion(#[source] MigrationError),
    /// The migration plan itself is malformed.
    #[error("invalid migration plan: {0}")]
    Plan(#[source] MigrationError),
    /// Database names map to file names and are restricted.
    #[error("invalid database name `{0}`")]
    InvalidName(String),
    /// The partition is not defined at the current version.
    #[error("unknown partition `{0}`")]
    UnknownPartition(String),
    /// A key was missing, not allowed, or of the wrong type.
    #[error("data error: {0}")]
    Data(String),
    /// The write would overwrite an existing key.
    #[error("constraint error: {0}")]
    Constraint(String),
    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The partitions on disk do not match what the plan declares.
    #[error("partition layout of `{name}` does not match v{version}: {detail}")]
    SchemaMismatch {
        name: String,
        version: u32,
        detail: String,
    },
    /// Error from the underlying storage backend.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A stored key could not be decoded.
    #[error("corrupt key: {0}")]
    Key(#[from] KeyError),
    /// The handle belongs to a database that has been closed.
    #[error("database `{0}` is closed")]
    Closed(String),
    /// The store lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
    /// The blocking worker running an open was lost.
    #[error("open worker failed: {0}")]
    Worker(String),
}

impl StoreError {
    /// Whether this is the downgrade error.
    pub fn is_version_error(&self) -> bool {
        matches!(self, Self::Version { .. })
    }

    /// Whether the failure happened inside the migration.
    pub fn is_migration_error(&self) -> bool {
        matches!(self, Self::Migration { .. })
    }
}

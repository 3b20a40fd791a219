use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::MigrationError;

/// How records in a partition are keyed.
///
/// Fixed for the lifetime of a partition. Changing it means deleting the
/// partition and creating it again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum KeyDef {
    /// The key is read from a field of the record (dotted for nested fields).
    Path(String),
    /// The key is supplied by the caller on every write.
    External,
}

impl KeyDef {
    /// Key extracted from `field`.
    pub fn path(field: impl Into<String>) -> Self {
        Self::Path(field.into())
    }

    /// The key path field, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Path(field) => Some(field),
            Self::External => None,
        }
    }
}

impl fmt::Display for KeyDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(field) => write!(f, "keyPath={field}"),
            Self::External => f.write_str("external"),
        }
    }
}

/// A partition name together with its key definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSchema {
    /// Name of the partition.
    pub name: String,
    /// How its records are keyed.
    pub key: KeyDef,
}

/// Structural handle passed to migration steps.
///
/// Backends implement this over an open upgrade transaction; every change
/// made through it commits or rolls back together with the version bump.
pub trait SchemaEditor {
    /// All partitions currently defined, ordered by name.
    fn partitions(&self) -> Result<Vec<PartitionSchema>, MigrationError>;

    /// Create a partition. Fails with [`MigrationError::AlreadyExists`]
    /// if a partition with that name is already defined.
    fn create_partition(&mut self, name: &str, key: KeyDef) -> Result<(), MigrationError>;

    /// Delete a partition and every record in it. Fails with
    /// [`MigrationError::NotFound`] if it does not exist.
    fn delete_partition(&mut self, name: &str) -> Result<(), MigrationError>;

    /// Names of all defined partitions.
    fn partition_names(&self) -> Result<Vec<String>, MigrationError> {
        Ok(self.partitions()?.into_iter().map(|p| p.name).collect())
    }

    /// Key definition of `name`, or `None` if it does not exist.
    fn key_def(&self, name: &str) -> Result<Option<KeyDef>, MigrationError> {
        Ok(self
            .partitions()?
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| p.key))
    }

    /// Whether a partition named `name` exists.
    fn contains_partition(&self, name: &str) -> Result<bool, MigrationError> {
        Ok(self.key_def(name)?.is_some())
    }

    /// Create `name` unless it already exists. Returns `true` if created.
    ///
    /// An existing partition is left as is, even if its key differs.
    fn ensure_partition(&mut self, name: &str, key: KeyDef) -> Result<bool, MigrationError> {
        if self.contains_partition(name)? {
            return Ok(false);
        }
        self.create_partition(name, key)?;
        Ok(true)
    }

    /// Drop `name` if present (losing its records) and create it with `key`.
    fn recreate_partition(&mut self, name: &str, key: KeyDef) -> Result<(), MigrationError> {
        if self.contains_partition(name)? {
            self.delete_partition(name)?;
        }
        self.create_partition(name, key)
    }
}

/// Partition layout held purely in memory.
///
/// Used to compute the layout a plan declares for a version, and to test
/// migration steps without a storage engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    partitions: BTreeMap<String, KeyDef>,
}

impl SchemaSnapshot {
    /// An empty layout (version 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from an existing list of partitions.
    pub fn from_partitions(partitions: impl IntoIterator<Item = PartitionSchema>) -> Self {
        Self {
            partitions: partitions.into_iter().map(|p| (p.name, p.key)).collect(),
        }
    }

    /// Key definition of `name`.
    pub fn key_def(&self, name: &str) -> Option<&KeyDef> {
        self.partitions.get(name)
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Whether no partition is defined.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Iterate `(name, key)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyDef)> {
        self.partitions.iter().map(|(n, k)| (n.as_str(), k))
    }
}

impl SchemaEditor for SchemaSnapshot {
    fn partitions(&self) -> Result<Vec<PartitionSchema>, MigrationError> {
        Ok(self
            .partitions
            .iter()
            .map(|(name, key)| PartitionSchema {
                name: name.clone(),
                key: key.clone(),
            })
            .collect())
    }

    fn create_partition(&mut self, name: &str, key: KeyDef) -> Result<(), MigrationError> {
        if self.partitions.contains_key(name) {
            return Err(MigrationError::AlreadyExists(name.to_string()));
        }
        self.partitions.insert(name.to_string(), key);
        Ok(())
    }

    fn delete_partition(&mut self, name: &str) -> Result<(), MigrationError> {
        self.partitions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))
    }

    fn key_def(&self, name: &str) -> Result<Option<KeyDef>, MigrationError> {
        Ok(self.partitions.get(name).cloned())
    }
}

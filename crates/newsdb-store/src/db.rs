//! The ready-to-use database handle.
//!
//! `Store` wraps a storage backend with a schema version and a fixed set of
//! partitions. Opening one runs whatever migrations are needed to reach the
//! requested version before the handle is returned, so callers never see a
//! half-upgraded database.
//!
//! # Example
//!
//! ```
//! use newsdb_store::{FnStep, Key, KeyDef, MemoryBackend, MigrationPlan, Store};
//! use serde_json::json;
//!
//! let mut plan = MigrationPlan::new();
//! plan.push(Box::new(FnStep::new(1, "feeds by url", |db| {
//!     db.ensure_partition("feeds", KeyDef::path("url"))?;
//!     Ok(())
//! })))
//! .unwrap();
//!
//! let store = Store::open(MemoryBackend::new(), "reader", 1, &plan).unwrap();
//! let key = store.put("feeds", None, &json!({"url": "https://x/rss"})).unwrap();
//! assert_eq!(key, Key::from("https://x/rss"));
//! assert!(store.get("feeds", "https://x/rss").unwrap().is_some());
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use newsdb_migrate::{KeyDef, MigrationPlan, PartitionSchema, SchemaSnapshot};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::key::Key;
use crate::traits::Transactional;
use crate::upgrade::UpgradeTx;

/// Handle to an open, fully migrated database.
///
/// Cheap to clone; clones share the same backend. Every operation holds the
/// store lock for its duration, so operations from different threads are
/// applied one at a time.
pub struct Store<B: Transactional> {
    inner: Arc<Inner<B>>,
}

struct Inner<B> {
    name: String,
    state: Mutex<State<B>>,
}

struct State<B> {
    name: String,
    /// Taken by `close`.
    backend: Option<B>,
    version: u32,
    schema: SchemaSnapshot,
}

impl<B: Transactional> Clone for Store<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Transactional> std::fmt::Debug for Store<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// Database names become file names, so they are kept to a safe alphabet.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

impl<B: Transactional> State<B> {
    fn load(backend: B, name: &str) -> Result<Self, StoreError> {
        let unavailable = |e: crate::BackendError| StoreError::StorageUnavailable {
            name: name.to_string(),
            reason: e.to_string(),
        };
        let version = backend.stored_version().map_err(unavailable)?;
        let schema = SchemaSnapshot::from_partitions(backend.partitions().map_err(unavailable)?);
        Ok(Self {
            name: name.to_string(),
            backend: Some(backend),
            version,
            schema,
        })
    }

    fn backend(&self) -> Result<&B, StoreError> {
        self.backend
            .as_ref()
            .ok_or_else(|| StoreError::Closed(self.name.clone()))
    }

    fn backend_mut(&mut self) -> Result<&mut B, StoreError> {
        let name = &self.name;
        self.backend
            .as_mut()
            .ok_or_else(|| StoreError::Closed(name.clone()))
    }

    fn refresh(&mut self) -> Result<(), StoreError> {
        let backend = self.backend()?;
        let version = backend.stored_version()?;
        let partitions = backend.partitions()?;
        self.version = version;
        self.schema = SchemaSnapshot::from_partitions(partitions);
        Ok(())
    }

    fn upgrade(&mut self, target: u32, plan: &MigrationPlan) -> Result<(), StoreError> {
        let owned = self.name.clone();
        let name = owned.as_str();
        if target == 0 {
            return Err(StoreError::InvalidVersion(
                newsdb_migrate::MigrationError::InvalidVersion(0),
            ));
        }
        let stored = self.version;
        if target < stored {
            return Err(StoreError::Version {
                name: name.to_string(),
                requested: target,
                stored,
            });
        }
        plan.validate(target).map_err(StoreError::InvalidVersion)?;

        if target > stored {
            info!(db = name, from = stored, to = target, "upgrading database");
            let result = self.backend_mut()?.transaction(|backend| -> Result<usize, StoreError> {
                let applied = {
                    let mut tx = UpgradeTx::new(name, backend);
                    plan.run(&mut tx, stored, target)
                        .map_err(|source| StoreError::Migration {
                            name: name.to_string(),
                            version: target,
                            source,
                        })?
                };
                backend.set_version(target)?;
                Ok(applied)
            });
            match result {
                Ok(applied) => {
                    info!(db = name, version = target, steps = applied, "upgrade committed");
                }
                Err(e) => {
                    warn!(db = name, from = stored, to = target, error = %e, "upgrade rolled back");
                    if let Err(reload) = self.refresh() {
                        warn!(db = name, error = %reload, "could not re-read layout after rollback");
                    }
                    return Err(e);
                }
            }
            self.refresh()?;
        }

        self.verify(plan)
    }

    /// Every partition the plan declares at the current version must exist
    /// with the declared key.
    fn verify(&self, plan: &MigrationPlan) -> Result<(), StoreError> {
        let name = self.name.as_str();
        let expected = plan
            .expected_schema(self.version)
            .map_err(StoreError::Plan)?;
        let mismatch = |detail: String| StoreError::SchemaMismatch {
            name: name.to_string(),
            version: self.version,
            detail,
        };
        for (partition, key) in expected.iter() {
            match self.schema.key_def(partition) {
                None => return Err(mismatch(format!("partition `{partition}` is missing"))),
                Some(found) if found != key => {
                    return Err(mismatch(format!(
                        "partition `{partition}` is keyed by {found}, expected {key}"
                    )))
                }
                Some(_) => {}
            }
        }
        for (partition, _) in self.schema.iter() {
            if expected.key_def(partition).is_none() {
                warn!(db = name, partition, "partition not declared by the migration plan");
            }
        }
        Ok(())
    }

    fn key_def(&self, partition: &str) -> Result<&KeyDef, StoreError> {
        self.schema
            .key_def(partition)
            .ok_or_else(|| StoreError::UnknownPartition(partition.to_string()))
    }
}

/// Work out the key a record is stored under.
fn resolve_key(
    partition: &str,
    key_def: &KeyDef,
    explicit: Option<Key>,
    value: &Value,
) -> Result<Key, StoreError> {
    match (key_def, explicit) {
        (KeyDef::Path(field), None) => {
            Key::from_record(value, field).map_err(|e| StoreError::Data(e.to_string()))
        }
        (KeyDef::Path(field), Some(_)) => Err(StoreError::Data(format!(
            "partition `{partition}` takes its key from `{field}`; an explicit key is not allowed"
        ))),
        (KeyDef::External, Some(key)) => Ok(key),
        (KeyDef::External, None) => Err(StoreError::Data(format!(
            "partition `{partition}` requires an explicit key"
        ))),
    }
}

impl<B: Transactional> Store<B> {
    /// Open `backend` as database `name` at `target`, migrating with `plan`.
    ///
    /// If the stored version is below `target`, every plan step in
    /// `(stored, target]` runs inside one transaction before this returns.
    /// An equal version runs nothing. A lower target fails with
    /// [`StoreError::Version`] and leaves the database untouched.
    pub fn open(
        backend: B,
        name: &str,
        target: u32,
        plan: &MigrationPlan,
    ) -> Result<Self, StoreError> {
        validate_name(name)?;
        let mut state = State::load(backend, name)?;
        state.upgrade(target, plan)?;
        info!(db = name, version = state.version, "database ready");
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(state),
            }),
        })
    }

    /// Upgrade this open database in place to `target`.
    ///
    /// Same rules as [`Store::open`]. Every clone of this handle sees the
    /// new version once this returns.
    pub fn upgrade(&self, target: u32, plan: &MigrationPlan) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.upgrade(target, plan)
    }

    /// The state of an open database; [`StoreError::Closed`] once closed.
    fn lock(&self) -> Result<MutexGuard<'_, State<B>>, StoreError> {
        let state = self.inner.state.lock().map_err(|_| StoreError::LockPoisoned)?;
        if state.backend.is_none() {
            return Err(StoreError::Closed(self.inner.name.clone()));
        }
        Ok(state)
    }

    /// Whether the database behind this handle has been closed.
    pub fn is_closed(&self) -> bool {
        match self.inner.state.lock() {
            Ok(state) => state.backend.is_none(),
            Err(poisoned) => poisoned.into_inner().backend.is_none(),
        }
    }

    /// Name of the database.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current schema version.
    pub fn version(&self) -> Result<u32, StoreError> {
        Ok(self.lock()?.version)
    }

    /// Partitions at the current version, ordered by name.
    pub fn partitions(&self) -> Result<Vec<PartitionSchema>, StoreError> {
        Ok(self
            .lock()?
            .schema
            .iter()
            .map(|(name, key)| PartitionSchema {
                name: name.to_string(),
                key: key.clone(),
            })
            .collect())
    }

    /// Whether `partition` exists.
    pub fn contains_partition(&self, partition: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.schema.key_def(partition).is_some())
    }

    /// Read a record.
    pub fn get(&self, partition: &str, key: impl Into<Key>) -> Result<Option<Value>, StoreError> {
        let state = self.lock()?;
        state.key_def(partition)?;
        match state.backend()?.get(partition, &key.into().encode())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read a record into a typed value.
    pub fn get_as<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: impl Into<Key>,
    ) -> Result<Option<T>, StoreError> {
        match self.get(partition, key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a record. Returns the key it was stored under.
    ///
    /// Key-path partitions take the key from the record and reject `key`;
    /// externally keyed partitions require it.
    pub fn put(&self, partition: &str, key: Option<Key>, value: &Value) -> Result<Key, StoreError> {
        self.write(partition, key, value, false)
    }

    /// Serialize `value` and store it like [`Store::put`].
    pub fn put_as<T: Serialize>(
        &self,
        partition: &str,
        key: Option<Key>,
        value: &T,
    ) -> Result<Key, StoreError> {
        let value = serde_json::to_value(value)?;
        self.put(partition, key, &value)
    }

    /// Insert a record, failing with [`StoreError::Constraint`] if the key
    /// is already taken.
    pub fn add(&self, partition: &str, key: Option<Key>, value: &Value) -> Result<Key, StoreError> {
        self.write(partition, key, value, true)
    }

    fn write(
        &self,
        partition: &str,
        key: Option<Key>,
        value: &Value,
        no_overwrite: bool,
    ) -> Result<Key, StoreError> {
        let mut state = self.lock()?;
        let key = resolve_key(partition, state.key_def(partition)?, key, value)?;
        let encoded = key.encode();
        if no_overwrite && state.backend()?.get(partition, &encoded)?.is_some() {
            return Err(StoreError::Constraint(format!(
                "key `{key}` already exists in `{partition}`"
            )));
        }
        let bytes = serde_json::to_vec(value)?;
        state.backend_mut()?.put(partition, &encoded, &bytes)?;
        Ok(key)
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete(&self, partition: &str, key: impl Into<Key>) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        state.key_def(partition)?;
        Ok(state.backend_mut()?.delete(partition, &key.into().encode())?)
    }

    /// All records of a partition in key order.
    pub fn list(&self, partition: &str) -> Result<Vec<(Key, Value)>, StoreError> {
        let state = self.lock()?;
        state.key_def(partition)?;
        state
            .backend()?
            .scan(partition)?
            .into_iter()
            .map(|(raw, bytes)| Ok((Key::decode(&raw)?, serde_json::from_slice(&bytes)?)))
            .collect()
    }

    /// All records of a partition as typed values, in key order.
    pub fn list_as<T: DeserializeOwned>(&self, partition: &str) -> Result<Vec<(Key, T)>, StoreError> {
        self.list(partition)?
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::from_value(value)?)))
            .collect()
    }

    /// All keys of a partition in order.
    pub fn keys(&self, partition: &str) -> Result<Vec<Key>, StoreError> {
        let state = self.lock()?;
        state.key_def(partition)?;
        state
            .backend()?
            .scan(partition)?
            .into_iter()
            .map(|(raw, _)| Ok(Key::decode(&raw)?))
            .collect()
    }

    /// Number of records in a partition.
    pub fn count(&self, partition: &str) -> Result<u64, StoreError> {
        let state = self.lock()?;
        state.key_def(partition)?;
        Ok(state.backend()?.count(partition)?)
    }

    /// Remove every record of a partition. Returns how many were removed.
    pub fn clear(&self, partition: &str) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        state.key_def(partition)?;
        Ok(state.backend_mut()?.clear(partition)?)
    }

    /// Flush and release the backend.
    ///
    /// Closes the database for every clone of this handle: later operations
    /// on any of them fail with [`StoreError::Closed`]. Closing twice is a
    /// no-op.
    pub fn close(self) -> Result<(), StoreError> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        if let Some(mut backend) = state.backend.take() {
            backend.flush()?;
            info!(db = %self.inner.name, "database closed");
        }
        Ok(())
    }
}

//! Process-wide owner of open stores.
//!
//! Build one `StoreRegistry` at startup and hand it to whoever needs a
//! database. `open` is awaitable: the backend open and any upgrade run on a
//! blocking worker, and repeated opens of one name share a handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use newsdb_migrate::MigrationPlan;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::db::{validate_name, Store};
use crate::error::StoreError;
use crate::memory::MemoryBackend;
use crate::traits::{BackendError, Transactional};

/// Creates the backend for a database name.
pub type Opener<B> = Arc<dyn Fn(&str) -> Result<B, BackendError> + Send + Sync>;

/// Keeps at most one open [`Store`] per database name.
pub struct StoreRegistry<B: Transactional> {
    opener: Opener<B>,
    stores: AsyncMutex<HashMap<String, Store<B>>>,
}

impl<B: Transactional> std::fmt::Debug for StoreRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry").finish_non_exhaustive()
    }
}

impl<B: Transactional> StoreRegistry<B> {
    /// A registry that creates backends with `opener`.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(&str) -> Result<B, BackendError> + Send + Sync + 'static,
    {
        Self {
            opener: Arc::new(opener),
            stores: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Get the ready handle for `name` at version `target`.
    ///
    /// Opens are serialized per registry. When `name` is already open, the
    /// same handle comes back, upgraded in place first if `target` is
    /// higher. The blocking work keeps running to completion even if the
    /// returned future is dropped.
    pub async fn open(
        &self,
        name: &str,
        target: u32,
        plan: Arc<MigrationPlan>,
    ) -> Result<Store<B>, StoreError> {
        validate_name(name)?;
        let mut stores = self.stores.lock().await;

        if let Some(store) = stores.get(name).filter(|s| !s.is_closed()) {
            let store = store.clone();
            if store.version()? != target {
                debug!(db = name, target, "upgrading open database");
                let handle = store.clone();
                tokio::task::spawn_blocking(move || handle.upgrade(target, &plan))
                    .await
                    .map_err(|e| StoreError::Worker(e.to_string()))??;
            }
            return Ok(store);
        }

        let opener = Arc::clone(&self.opener);
        let owned = name.to_string();
        let store = tokio::task::spawn_blocking(move || {
            let backend = opener(&owned).map_err(|e| StoreError::StorageUnavailable {
                name: owned.clone(),
                reason: e.to_string(),
            })?;
            Store::open(backend, &owned, target, &plan)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))??;

        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// Whether `name` is currently open.
    pub async fn is_open(&self, name: &str) -> bool {
        self.stores.lock().await.contains_key(name)
    }

    /// Names of the open databases, sorted.
    pub async fn open_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close `name`. Returns whether it was open.
    ///
    /// The backend is flushed and released. Handles already given out fail
    /// with [`StoreError::Closed`] from then on; open the name again for a
    /// fresh one.
    pub async fn close(&self, name: &str) -> Result<bool, StoreError> {
        let removed = self.stores.lock().await.remove(name);
        match removed {
            Some(store) => {
                tokio::task::spawn_blocking(move || store.close())
                    .await
                    .map_err(|e| StoreError::Worker(e.to_string()))??;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every open database, like [`StoreRegistry::close`].
    pub async fn close_all(&self) -> Result<(), StoreError> {
        let drained: Vec<Store<B>> = self.stores.lock().await.drain().map(|(_, s)| s).collect();
        for store in drained {
            tokio::task::spawn_blocking(move || store.close())
                .await
                .map_err(|e| StoreError::Worker(e.to_string()))??;
        }
        Ok(())
    }
}

impl StoreRegistry<MemoryBackend> {
    /// In-memory databases. Data survives `close` and reopen for the life of
    /// the registry.
    pub fn memory() -> Self {
        let backends: Mutex<HashMap<String, MemoryBackend>> = Mutex::new(HashMap::new());
        Self::with_opener(move |name| {
            let mut backends = backends.lock().map_err(|_| BackendError::LockPoisoned)?;
            Ok(backends.entry(name.to_string()).or_default().clone())
        })
    }
}

#[cfg(feature = "sqlite")]
impl StoreRegistry<crate::sqlite::SqliteBackend> {
    /// SQLite databases, one file per name under `config.data_dir`, or
    /// private in-memory connections when no directory is set.
    pub fn sqlite(config: crate::config::StoreConfig) -> Self {
        Self::with_opener(move |name| match config.database_path(name) {
            Some(path) => crate::sqlite::SqliteBackend::open_with_config(path, &config.sqlite),
            None => crate::sqlite::SqliteBackend::open_in_memory(),
        })
    }
}

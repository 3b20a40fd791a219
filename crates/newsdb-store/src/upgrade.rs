use newsdb_migrate::{KeyDef, MigrationError, PartitionSchema, SchemaEditor};
use tracing::{debug, warn};

use crate::traits::{Backend, BackendError};

/// [`SchemaEditor`] over a backend that is inside an upgrade transaction.
pub(crate) struct UpgradeTx<'a, B: Backend> {
    db: &'a str,
    backend: &'a mut B,
}

impl<'a, B: Backend> UpgradeTx<'a, B> {
    pub(crate) fn new(db: &'a str, backend: &'a mut B) -> Self {
        Self { db, backend }
    }
}

fn engine(e: BackendError) -> MigrationError {
    match e {
        BackendError::PartitionExists(name) => MigrationError::AlreadyExists(name),
        BackendError::UnknownPartition(name) => MigrationError::NotFound(name),
        other => MigrationError::Engine(other.to_string()),
    }
}

impl<B: Backend> SchemaEditor for UpgradeTx<'_, B> {
    fn partitions(&self) -> Result<Vec<PartitionSchema>, MigrationError> {
        self.backend.partitions().map_err(engine)
    }

    fn create_partition(&mut self, name: &str, key: KeyDef) -> Result<(), MigrationError> {
        self.backend.create_partition(name, &key).map_err(engine)?;
        debug!(db = self.db, partition = name, key = %key, "created partition");
        Ok(())
    }

    fn delete_partition(&mut self, name: &str) -> Result<(), MigrationError> {
        let records = self.backend.count(name).map_err(engine)?;
        self.backend.delete_partition(name).map_err(engine)?;
        warn!(
            db = self.db,
            partition = name,
            records,
            "deleted partition and its records"
        );
        Ok(())
    }
}

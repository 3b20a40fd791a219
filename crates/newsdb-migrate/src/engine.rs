use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::schema::{SchemaEditor, SchemaSnapshot};

/// A single step in a database's schema history.
///
/// Step N brings the layout from whatever version N-1 left behind to version
/// N. Steps must check which partitions exist before acting: an upgrade from
/// version 0 straight to the latest runs every step in one pass.
pub trait MigrationStep: Send + Sync {
    /// The version this step brings the database to.
    fn version(&self) -> u32;
    /// Short human-readable summary, shown by tooling.
    fn description(&self) -> &str;
    /// Apply the structural changes.
    fn apply(&self, db: &mut dyn SchemaEditor) -> Result<(), MigrationError>;
}

/// Error during migration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    /// A partition with this name already exists.
    #[error("partition `{0}` already exists")]
    AlreadyExists(String),
    /// No partition with this name exists.
    #[error("partition `{0}` does not exist")]
    NotFound(String),
    /// A step was appended out of order.
    #[error("migration step v{found} cannot follow v{latest}")]
    OutOfOrder { latest: u32, found: u32 },
    /// The plan does not reach the requested version.
    #[error("no migration path to v{target}, latest known version is v{latest}")]
    NoPath { target: u32, latest: u32 },
    /// The requested range goes backwards.
    #[error("cannot migrate backwards from v{from} to v{to}")]
    Downgrade { from: u32, to: u32 },
    /// Versions start at 1.
    #[error("invalid schema version v{0}")]
    InvalidVersion(u32),
    /// A step failed.
    #[error("migration to v{version} failed: {reason}")]
    StepFailed { version: u32, reason: String },
    /// The storage engine rejected a structural change.
    #[error("storage engine error: {0}")]
    Engine(String),
}

/// Summary of a registered step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInfo {
    /// Version the step migrates to.
    pub version: u32,
    /// Its description.
    pub description: String,
}

/// A step backed by a closure.
pub struct FnStep<F> {
    version: u32,
    description: String,
    apply: F,
}

impl<F> FnStep<F>
where
    F: Fn(&mut dyn SchemaEditor) -> Result<(), MigrationError> + Send + Sync,
{
    /// Create a step migrating to `version`.
    pub fn new(version: u32, description: impl Into<String>, apply: F) -> Self {
        Self {
            version,
            description: description.into(),
            apply,
        }
    }
}

impl<F> MigrationStep for FnStep<F>
where
    F: Fn(&mut dyn SchemaEditor) -> Result<(), MigrationError> + Send + Sync,
{
    fn version(&self) -> u32 {
        self.version
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn apply(&self, db: &mut dyn SchemaEditor) -> Result<(), MigrationError> {
        (self.apply)(db)
    }
}

/// Append-only history of schema steps, indexed by version.
///
/// Step versions are contiguous starting at 1. Running the plan from a stored
/// version `from` to a target `to` applies every step in `(from, to]`, in
/// order, against the same [`SchemaEditor`].
///
/// # Example
///
/// ```
/// use newsdb_migrate::{FnStep, KeyDef, MigrationPlan, SchemaEditor, SchemaSnapshot};
///
/// let mut plan = MigrationPlan::new();
/// plan.push(Box::new(FnStep::new(1, "items by id", |db| {
///     db.ensure_partition("items", KeyDef::path("id"))?;
///     Ok(())
/// })))
/// .unwrap();
/// plan.push(Box::new(FnStep::new(2, "items by sku", |db| {
///     db.recreate_partition("items", KeyDef::path("sku"))
/// })))
/// .unwrap();
///
/// let mut db = SchemaSnapshot::new();
/// assert_eq!(plan.run(&mut db, 0, 2).unwrap(), 2);
/// assert_eq!(db.key_def("items"), Some(&KeyDef::path("sku")));
/// ```
#[derive(Default)]
pub struct MigrationPlan {
    steps: Vec<Box<dyn MigrationStep>>,
}

impl MigrationPlan {
    /// An empty plan (latest version 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from steps given in version order.
    pub fn from_steps(
        steps: impl IntoIterator<Item = Box<dyn MigrationStep>>,
    ) -> Result<Self, MigrationError> {
        let mut plan = Self::new();
        for step in steps {
            plan.push(step)?;
        }
        Ok(plan)
    }

    /// Append a step. Its version must be exactly one above the latest.
    pub fn push(&mut self, step: Box<dyn MigrationStep>) -> Result<(), MigrationError> {
        let latest = self.latest_version();
        if step.version() != latest + 1 {
            return Err(MigrationError::OutOfOrder {
                latest,
                found: step.version(),
            });
        }
        self.steps.push(step);
        Ok(())
    }

    /// Highest version this plan can migrate to.
    pub fn latest_version(&self) -> u32 {
        self.steps.last().map(|s| s.version()).unwrap_or(0)
    }

    /// All registered steps as `(version, description)`.
    pub fn steps(&self) -> Vec<StepInfo> {
        self.steps
            .iter()
            .map(|s| StepInfo {
                version: s.version(),
                description: s.description().to_string(),
            })
            .collect()
    }

    /// Check that `target` is a version this plan can produce.
    pub fn validate(&self, target: u32) -> Result<(), MigrationError> {
        if target == 0 {
            return Err(MigrationError::InvalidVersion(target));
        }
        if target > self.latest_version() {
            return Err(MigrationError::NoPath {
                target,
                latest: self.latest_version(),
            });
        }
        Ok(())
    }

    /// Bring `db` from version `from` to version `to`.
    ///
    /// Returns the number of steps applied. `from == to` applies nothing.
    /// The caller owns the transaction: on `Err`, changes already made
    /// through `db` must be rolled back by the engine.
    pub fn run(
        &self,
        db: &mut dyn SchemaEditor,
        from: u32,
        to: u32,
    ) -> Result<usize, MigrationError> {
        self.validate(to)?;
        if from > to {
            return Err(MigrationError::Downgrade { from, to });
        }

        let mut applied = 0;
        for step in self
            .steps
            .iter()
            .filter(|s| s.version() > from && s.version() <= to)
        {
            debug!(
                version = step.version(),
                description = step.description(),
                "applying migration step"
            );
            step.apply(db).map_err(|e| match e {
                MigrationError::StepFailed { .. } => e,
                other => MigrationError::StepFailed {
                    version: step.version(),
                    reason: other.to_string(),
                },
            })?;
            applied += 1;
        }
        Ok(applied)
    }

    /// The layout a fresh database has after migrating to `version`.
    pub fn expected_schema(&self, version: u32) -> Result<SchemaSnapshot, MigrationError> {
        let mut snapshot = SchemaSnapshot::new();
        self.run(&mut snapshot, 0, version)?;
        Ok(snapshot)
    }
}

impl fmt::Debug for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationPlan")
            .field("steps", &self.steps())
            .finish()
    }
}

//! # newsdb-migrate
//!
//! Schema versioning for [`newsdb-store`](https://docs.rs/newsdb-store).
//!
//! A database is a named set of partitions, each with a fixed key definition.
//! When the application ships a new layout, it appends a step to its
//! [`MigrationPlan`]. Opening the database at a higher version runs every
//! step between the stored version and the requested one, in order, inside a
//! single upgrade transaction.
//!
//! ## Key Concepts
//!
//! - **Append-only**: step N+1 can only be pushed after step N. The full
//!   history stays inspectable through [`MigrationPlan::steps`].
//! - **Cumulative**: one upgrade applies every step in `(from, to]` in a
//!   single pass, whether the stored version is 0, 1 or anything in between.
//! - **Idempotent steps**: steps check which partitions exist before changing
//!   anything, so re-running a step is harmless for unaffected partitions.
//! - **Engine-free**: steps only see a [`SchemaEditor`]. The in-memory
//!   [`SchemaSnapshot`] implements it, so migrations are unit-testable
//!   without a storage engine.
//!
//! ```
//! use newsdb_migrate::{FnStep, KeyDef, MigrationPlan, SchemaEditor};
//!
//! let mut plan = MigrationPlan::new();
//! plan.push(Box::new(FnStep::new(1, "create notes", |db| {
//!     db.ensure_partition("notes", KeyDef::path("id"))?;
//!     Ok(())
//! })))
//! .unwrap();
//!
//! let schema = plan.expected_schema(1).unwrap();
//! assert_eq!(schema.key_def("notes"), Some(&KeyDef::path("id")));
//! ```

mod engine;
mod schema;

pub use engine::{FnStep, MigrationError, MigrationPlan, MigrationStep, StepInfo};
pub use schema::{KeyDef, PartitionSchema, SchemaEditor, SchemaSnapshot};

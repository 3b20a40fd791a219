//! # newsdb-store
//!
//! Versioned, partitioned on-device storage for the newsdb reader.
//!
//! A database is opened by name at a target version together with its
//! [`MigrationPlan`]. Every migration needed to reach that version runs in a
//! single transaction before the [`Store`] handle is handed out; a handle
//! never exists for a half-upgraded database.
//!
//! ## Quick Start
//!
//! ```
//! use newsdb_store::{news::{open_news_db, Article}, StoreRegistry};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = StoreRegistry::memory();
//! let db = open_news_db(&registry).await.unwrap();
//!
//! db.save_article(&Article::new("https://news.example/1", "Hello")).unwrap();
//! db.set_setting("theme", &"dark").unwrap();
//! assert_eq!(db.articles().unwrap().len(), 1);
//! # });
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryBackend`] | *(always available)* | Testing, prototyping |
//! | `SqliteBackend` | `sqlite` (default) | Devices, desktop |

mod config;
mod db;
mod error;
mod key;
mod memory;
pub mod news;
mod registry;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;
mod upgrade;

pub use config::{ConfigError, JournalMode, SqliteConfig, StoreConfig, Synchronous, DB_FILE_EXTENSION};
pub use db::{validate_name, Store};
pub use error::StoreError;
pub use key::{Key, KeyError};
pub use memory::MemoryBackend;
pub use registry::{Opener, StoreRegistry};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
pub use traits::*;

pub use newsdb_migrate::{
    FnStep, KeyDef, MigrationError, MigrationPlan, MigrationStep, PartitionSchema, SchemaEditor,
    SchemaSnapshot, StepInfo,
};

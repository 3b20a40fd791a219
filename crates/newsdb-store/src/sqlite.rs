//! SQLite persistence backend using rusqlite.
//!
//! This is the on-device backend: one database file per database name.
//! Uses WAL mode by default.
//!
//! # Example
//!
//! ```no_run
//! use newsdb_store::{Backend, KeyDef, SqliteBackend};
//!
//! let mut backend = SqliteBackend::open("news-db.sqlite3").unwrap();
//! backend.create_partition("settings", &KeyDef::External).unwrap();
//! backend.put("settings", "1theme", b"\"dark\"").unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use newsdb_migrate::{KeyDef, PartitionSchema};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::config::SqliteConfig;
use crate::traits::{Backend, BackendError, Transactional};

const VERSION_KEY: &str = "schema_version";

/// SQLite persistence backend.
///
/// Access is serialized by the owning [`Store`](crate::Store), so the
/// connection is held directly. The bookkeeping tables are created on first
/// open; partitions themselves only appear through migrations.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Connection,
    path: Option<PathBuf>,
    read_only: bool,
}

impl SqliteBackend {
    /// Open (or create) a database file with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        Self::open_with_config(path, &SqliteConfig::default())
    }

    /// Open with custom configuration. Missing parent directories are created.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: &SqliteConfig,
    ) -> Result<Self, BackendError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_connection(&conn, config)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            read_only: false,
        })
    }

    /// Open an existing file for inspection.
    ///
    /// Nothing is written: no pragmas beyond the busy timeout, no
    /// bookkeeping tables. A file without them reads as version 0 with no
    /// partitions. Every write fails.
    pub fn open_read_only<P: AsRef<Path>>(
        path: P,
        config: &SqliteConfig,
    ) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            read_only: true,
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &SqliteConfig::default())?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn,
            path: None,
            read_only: false,
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), BackendError> {
        conn.execute_batch(&format!(
            "PRAGMA page_size = {};
             PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = {};",
            config.page_size,
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
            config.synchronous.as_str(),
        ))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<(), BackendError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS newsdb_meta (
                key         TEXT PRIMARY KEY,
                value       INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS newsdb_partitions (
                name        TEXT PRIMARY KEY,
                key_path    TEXT,
                created_at  INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE TABLE IF NOT EXISTS newsdb_records (
                partition   TEXT NOT NULL
                            REFERENCES newsdb_partitions(name) ON DELETE CASCADE,
                key         TEXT NOT NULL,
                data        BLOB NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (partition, key)
            );",
        )?;
        Ok(())
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn require_partition(&self, name: &str) -> Result<(), BackendError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM newsdb_partitions WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Err(BackendError::UnknownPartition(name.to_string()));
        }
        Ok(())
    }

    fn has_table(&self, table: &str) -> Result<bool, BackendError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether this connection was opened with [`SqliteBackend::open_read_only`].
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Path of the database file (`None` for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get the database file size in bytes.
    pub fn file_size(&self) -> Result<u64, BackendError> {
        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    /// Get the current journal mode.
    pub fn journal_mode(&self) -> Result<String, BackendError> {
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

impl Backend for SqliteBackend {
    fn stored_version(&self) -> Result<u32, BackendError> {
        if self.read_only && !self.has_table("newsdb_meta")? {
            return Ok(0);
        }
        let value: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM newsdb_meta WHERE key = ?1",
                params![VERSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            None => Ok(0),
            Some(v) => u32::try_from(v)
                .map_err(|_| BackendError::Corrupt(format!("stored version {v} out of range"))),
        }
    }

    fn set_version(&mut self, version: u32) -> Result<(), BackendError> {
        self.conn.execute(
            "INSERT INTO newsdb_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![VERSION_KEY, version as i64],
        )?;
        Ok(())
    }

    fn partitions(&self) -> Result<Vec<PartitionSchema>, BackendError> {
        if self.read_only && !self.has_table("newsdb_partitions")? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare("SELECT name, key_path FROM newsdb_partitions ORDER BY name")?;
        let partitions = stmt
            .query_map([], |row| {
                let key_path: Option<String> = row.get(1)?;
                Ok(PartitionSchema {
                    name: row.get(0)?,
                    key: key_path.map(KeyDef::Path).unwrap_or(KeyDef::External),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(partitions)
    }

    fn create_partition(&mut self, name: &str, key: &KeyDef) -> Result<(), BackendError> {
        if self.require_partition(name).is_ok() {
            return Err(BackendError::PartitionExists(name.to_string()));
        }
        self.conn.execute(
            "INSERT INTO newsdb_partitions (name, key_path) VALUES (?1, ?2)",
            params![name, key.field()],
        )?;
        Ok(())
    }

    fn delete_partition(&mut self, name: &str) -> Result<(), BackendError> {
        self.require_partition(name)?;
        self.conn.execute(
            "DELETE FROM newsdb_records WHERE partition = ?1",
            params![name],
        )?;
        self.conn.execute(
            "DELETE FROM newsdb_partitions WHERE name = ?1",
            params![name],
        )?;
        Ok(())
    }

    fn get(&self, partition: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.require_partition(partition)?;
        let result = self
            .conn
            .query_row(
                "SELECT data FROM newsdb_records WHERE partition = ?1 AND key = ?2",
                params![partition, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    fn put(&mut self, partition: &str, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.require_partition(partition)?;
        self.conn.execute(
            "INSERT INTO newsdb_records (partition, key, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(partition, key)
             DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![partition, key, value, Self::now_ms() as i64],
        )?;
        Ok(())
    }

    fn delete(&mut self, partition: &str, key: &str) -> Result<bool, BackendError> {
        self.require_partition(partition)?;
        let deleted = self.conn.execute(
            "DELETE FROM newsdb_records WHERE partition = ?1 AND key = ?2",
            params![partition, key],
        )?;
        Ok(deleted > 0)
    }

    fn scan(&self, partition: &str) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        self.require_partition(partition)?;
        let mut stmt = self.conn.prepare(
            "SELECT key, data FROM newsdb_records WHERE partition = ?1 ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![partition], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count(&self, partition: &str) -> Result<u64, BackendError> {
        self.require_partition(partition)?;
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM newsdb_records WHERE partition = ?1",
            params![partition],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn clear(&mut self, partition: &str) -> Result<u64, BackendError> {
        self.require_partition(partition)?;
        let deleted = self.conn.execute(
            "DELETE FROM newsdb_records WHERE partition = ?1",
            params![partition],
        )?;
        Ok(deleted as u64)
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        if !self.read_only && self.journal_mode()?.eq_ignore_ascii_case("wal") {
            self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }
}

impl Transactional for SqliteBackend {
    fn transaction<F, R, E>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Self) -> Result<R, E>,
        E: From<BackendError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(BackendError::from)?;
        match f(self) {
            Ok(result) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(BackendError::from(e).into());
                }
                Ok(result)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use console::style;
use newsdb_store::news::news_migrations;
use newsdb_store::{Backend, Key, SqliteBackend, Store, StoreConfig, StoreRegistry};
use serde_json::{json, Map, Value};
use tracing::debug;

pub type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Read `--config` if given and point it at `dir`.
pub fn load_config(file: Option<&Path>, dir: &Path) -> Result<StoreConfig> {
    let config = match file {
        Some(file) => StoreConfig::load(file)?,
        None => StoreConfig::default(),
    };
    Ok(StoreConfig {
        data_dir: Some(dir.to_path_buf()),
        ..config
    })
}

/// Integer-looking tokens become integer keys unless `text` is set.
pub fn parse_key(token: &str, text: bool) -> Key {
    match token.parse::<i64>() {
        Ok(n) if !text => Key::Int(n),
        _ => Key::from(token),
    }
}

/// `newsdb status <dir>`: Show version, partitions, and migration history.
pub fn status(config: &StoreConfig, name: &str) -> Result {
    let path = existing_file(config, name)?;
    let backend = SqliteBackend::open_read_only(&path, &config.sqlite)?;
    let stored = backend.stored_version()?;
    let plan = news_migrations()?;

    println!(
        "Database: {} (SQLite, {} mode)",
        path.display(),
        backend.journal_mode()?
    );
    println!("Size: {}", format_bytes(backend.file_size()?));
    println!(
        "Version: v{stored} (latest known: v{})",
        plan.latest_version()
    );
    println!();

    let partitions = backend.partitions()?;
    if partitions.is_empty() {
        println!("  (no partitions)");
    } else {
        println!("  {:<20} {:<20} {:>10}", "Partition", "Key", "Records");
        println!("  {}", "-".repeat(52));
        for partition in &partitions {
            println!(
                "  {:<20} {:<20} {:>10}",
                partition.name,
                partition.key.to_string(),
                format_num(backend.count(&partition.name)?),
            );
        }
    }
    println!();

    println!("Migrations:");
    for step in plan.steps() {
        let state = if step.version <= stored {
            style("applied").green()
        } else {
            style("pending").yellow()
        };
        println!("  v{:<4} {:<9} {}", step.version, state, step.description);
    }
    println!();

    Ok(())
}

/// `newsdb migrate <dir>`: Upgrade (or create) the database.
pub async fn migrate(config: StoreConfig, name: &str, to: Option<u32>) -> Result {
    let plan = news_migrations()?;
    let target = to.unwrap_or_else(|| plan.latest_version());
    let from = match config.database_path(name) {
        Some(path) if path.exists() => {
            SqliteBackend::open_read_only(&path, &config.sqlite)?.stored_version()?
        }
        _ => 0,
    };

    let registry = StoreRegistry::sqlite(config);
    let store = registry.open(name, target, Arc::new(plan)).await?;
    let version = store.version()?;
    drop(store);
    registry.close_all().await?;

    if from == version {
        println!("{name} is already at v{version}");
        return Ok(());
    }

    println!("Migrated {name}: v{from} -> v{version}");
    for step in news_migrations()?.steps() {
        if step.version > from && step.version <= version {
            println!("  {} v{} {}", style("+").green(), step.version, step.description);
        }
    }
    Ok(())
}

/// `newsdb get <dir> <partition> <key>`: Print one record.
pub async fn get(config: StoreConfig, name: &str, partition: &str, key: Key) -> Result {
    let (registry, store) = open_existing(config, name).await?;
    match store.get(partition, &key)? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => eprintln!("Record '{key}' not found in {partition}"),
    }
    drop(store);
    registry.close_all().await?;
    Ok(())
}

/// `newsdb put <dir> <partition> <json>`: Insert or replace one record.
pub async fn put(
    config: StoreConfig,
    name: &str,
    partition: &str,
    json: &str,
    key: Option<Key>,
) -> Result {
    let value: Value = serde_json::from_str(json)?;
    let (registry, store) = open_existing(config, name).await?;
    let key = store.put(partition, key, &value)?;
    println!("Stored {partition}/{key}");
    drop(store);
    registry.close_all().await?;
    Ok(())
}

/// `newsdb delete <dir> <partition> <key>`: Delete one record.
pub async fn delete(config: StoreConfig, name: &str, partition: &str, key: Key) -> Result {
    let (registry, store) = open_existing(config, name).await?;
    if store.delete(partition, &key)? {
        println!("Deleted {partition}/{key}");
    } else {
        eprintln!("Record '{key}' not found in {partition}");
    }
    drop(store);
    registry.close_all().await?;
    Ok(())
}

/// `newsdb list <dir> <partition>`: List records in key order.
pub async fn list(config: StoreConfig, name: &str, partition: &str) -> Result {
    let (registry, store) = open_existing(config, name).await?;
    let records = store.list(partition)?;

    println!("Partition: {partition} ({} records)", format_num(records.len() as u64));
    for (key, value) in &records {
        println!("  {:<40} {}", truncate(&key.to_string(), 40), value);
    }
    println!();

    drop(store);
    registry.close_all().await?;
    Ok(())
}

/// `newsdb export <dir>`: Dump partitions as JSON.
pub async fn export(config: StoreConfig, name: &str, partition: Option<&str>) -> Result {
    let (registry, store) = open_existing(config, name).await?;
    let output = export_json(&store, partition)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    drop(store);
    registry.close_all().await?;
    Ok(())
}

fn export_json<B: newsdb_store::Transactional>(
    store: &Store<B>,
    only: Option<&str>,
) -> Result<Value> {
    let mut partitions = Map::new();
    for partition in store.partitions()? {
        if only.is_some_and(|p| p != partition.name) {
            continue;
        }
        let records: Vec<Value> = store
            .list(&partition.name)?
            .into_iter()
            .map(|(key, value)| json!({ "key": key.to_value(), "value": value }))
            .collect();
        partitions.insert(
            partition.name.clone(),
            json!({ "key": partition.key, "records": records }),
        );
    }
    if let Some(only) = only {
        if !partitions.contains_key(only) {
            return Err(format!("unknown partition `{only}`").into());
        }
    }

    Ok(json!({
        "database": store.name(),
        "version": store.version()?,
        "partitions": partitions,
    }))
}

/// Open a database that already exists, at its stored version.
async fn open_existing(
    config: StoreConfig,
    name: &str,
) -> Result<(StoreRegistry<SqliteBackend>, Store<SqliteBackend>)> {
    let path = existing_file(&config, name)?;
    let stored = SqliteBackend::open_read_only(&path, &config.sqlite)?.stored_version()?;
    if stored == 0 {
        return Err(format!("database `{name}` is empty, run `newsdb migrate` first").into());
    }
    debug!(db = name, version = stored, "opening without upgrade");

    let registry = StoreRegistry::sqlite(config);
    let store = registry.open(name, stored, Arc::new(news_migrations()?)).await?;
    Ok((registry, store))
}

fn existing_file(config: &StoreConfig, name: &str) -> Result<PathBuf> {
    let path = config
        .database_path(name)
        .ok_or("no data directory configured")?;
    if !path.exists() {
        return Err(format!("no database `{name}` at {}", path.display()).into());
    }
    Ok(path)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_num(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{head}...")
    }
}

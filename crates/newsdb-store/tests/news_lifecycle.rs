//! Integration tests for the `news-db` lifecycle.
//!
//! Covers the full flow on both backends: fresh open at v1, data written at
//! v1, upgrade to v2, downgrade refusal, failed upgrades, and reopening
//! files through a fresh registry.

use std::sync::Arc;

use newsdb_store::news::{news_migrations, open_news_db, Article, NEWS, NEWS_DB_NAME, SETTINGS};
use newsdb_store::{
    Backend, FnStep, Key, KeyDef, MemoryBackend, MigrationPlan, PartitionSchema, SqliteBackend,
    Store, StoreConfig, StoreError, StoreRegistry, Transactional,
};
use serde_json::json;

fn plan() -> MigrationPlan {
    news_migrations().unwrap()
}

/// The news plan plus a v3 step that fails halfway through.
fn broken_plan() -> MigrationPlan {
    let mut plan = plan();
    plan.push(Box::new(FnStep::new(3, "archive", |db| {
        db.delete_partition(SETTINGS)?;
        db.create_partition("archive", KeyDef::path("link"))?;
        db.create_partition(NEWS, KeyDef::path("link"))
    })))
    .unwrap();
    plan
}

fn sqlite_file(dir: &tempfile::TempDir) -> SqliteBackend {
    SqliteBackend::open(dir.path().join("news-db.sqlite3")).unwrap()
}

// ── Generic checks, run against each backend ────────────────────────

fn fresh_open_at_v1<B: Transactional>(backend: B) {
    let store = Store::open(backend, NEWS_DB_NAME, 1, &plan()).unwrap();

    assert_eq!(store.version().unwrap(), 1);
    let partitions = store.partitions().unwrap();
    assert_eq!(partitions.len(), 2);
    assert_eq!(partitions[0].name, NEWS);
    assert_eq!(partitions[0].key, KeyDef::path("id"));
    assert_eq!(partitions[1].name, SETTINGS);
    assert_eq!(partitions[1].key, KeyDef::External);
    assert_eq!(store.count(NEWS).unwrap(), 0);
    assert_eq!(store.count(SETTINGS).unwrap(), 0);
}

fn upgrade_v1_data_to_v2<B: Transactional + Clone>(backend: B) {
    let v1 = Store::open(backend.clone(), NEWS_DB_NAME, 1, &plan()).unwrap();
    v1.put(NEWS, None, &json!({"id": "a1", "title": "old"})).unwrap();
    v1.put(SETTINGS, Some("theme".into()), &json!("dark")).unwrap();
    drop(v1);

    let v2 = Store::open(backend, NEWS_DB_NAME, 2, &plan()).unwrap();
    assert_eq!(v2.version().unwrap(), 2);
    assert_eq!(v2.count(NEWS).unwrap(), 0);
    assert_eq!(v2.get(SETTINGS, "theme").unwrap(), Some(json!("dark")));
    assert_eq!(
        v2.partitions().unwrap()[0].key,
        KeyDef::path("link"),
        "news is keyed by link after v2"
    );
}

fn reopen_same_version_is_noop<B: Transactional + Clone>(backend: B) {
    let store = Store::open(backend.clone(), NEWS_DB_NAME, 2, &plan()).unwrap();
    store
        .put(NEWS, None, &json!({"link": "https://x/1", "title": "T"}))
        .unwrap();
    drop(store);

    let again = Store::open(backend, NEWS_DB_NAME, 2, &plan()).unwrap();
    assert_eq!(again.version().unwrap(), 2);
    assert_eq!(again.count(NEWS).unwrap(), 1);
}

fn downgrade_leaves_database_unchanged<B: Transactional + Clone>(backend: B) {
    let store = Store::open(backend.clone(), NEWS_DB_NAME, 2, &plan()).unwrap();
    store
        .put(NEWS, None, &json!({"link": "https://x/1", "title": "T"}))
        .unwrap();
    drop(store);

    let err = Store::open(backend.clone(), NEWS_DB_NAME, 1, &plan()).unwrap_err();
    match err {
        StoreError::Version {
            requested, stored, ..
        } => {
            assert_eq!(requested, 1);
            assert_eq!(stored, 2);
        }
        other => panic!("expected version error, got {other}"),
    }

    assert_eq!(backend.stored_version().unwrap(), 2);
    let store = Store::open(backend, NEWS_DB_NAME, 2, &plan()).unwrap();
    assert_eq!(store.count(NEWS).unwrap(), 1);
}

fn failed_upgrade_rolls_back<B: Transactional + Clone>(backend: B) {
    let store = Store::open(backend.clone(), NEWS_DB_NAME, 2, &plan()).unwrap();
    store
        .put(SETTINGS, Some("lang".into()), &json!("en"))
        .unwrap();
    drop(store);

    let err = Store::open(backend.clone(), NEWS_DB_NAME, 3, &broken_plan()).unwrap_err();
    assert!(err.is_migration_error(), "{err}");

    assert_eq!(backend.stored_version().unwrap(), 2);
    let names: Vec<String> = backend
        .partitions()
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec![NEWS, SETTINGS]);

    let store = Store::open(backend, NEWS_DB_NAME, 2, &plan()).unwrap();
    assert_eq!(store.get(SETTINGS, "lang").unwrap(), Some(json!("en")));
}

// ── Memory backend ──────────────────────────────────────────────────

#[test]
fn memory_fresh_open_at_v1() {
    fresh_open_at_v1(MemoryBackend::new());
}

#[test]
fn memory_upgrade_v1_data_to_v2() {
    upgrade_v1_data_to_v2(MemoryBackend::new());
}

#[test]
fn memory_reopen_same_version_is_noop() {
    reopen_same_version_is_noop(MemoryBackend::new());
}

#[test]
fn memory_downgrade_leaves_database_unchanged() {
    downgrade_leaves_database_unchanged(MemoryBackend::new());
}

#[test]
fn memory_failed_upgrade_rolls_back() {
    failed_upgrade_rolls_back(MemoryBackend::new());
}

// ── SQLite backend ──────────────────────────────────────────────────
//
// SQLite handles are not `Clone`, so these reopen the file instead.

#[test]
fn sqlite_fresh_open_at_v1() {
    let dir = tempfile::tempdir().unwrap();
    fresh_open_at_v1(sqlite_file(&dir));
}

#[test]
fn sqlite_upgrade_v1_data_to_v2() {
    let dir = tempfile::tempdir().unwrap();
    let v1 = Store::open(sqlite_file(&dir), NEWS_DB_NAME, 1, &plan()).unwrap();
    v1.put(NEWS, None, &json!({"id": "a1", "title": "old"})).unwrap();
    v1.put(SETTINGS, Some("theme".into()), &json!("dark")).unwrap();
    v1.close().unwrap();

    let v2 = Store::open(sqlite_file(&dir), NEWS_DB_NAME, 2, &plan()).unwrap();
    assert_eq!(v2.count(NEWS).unwrap(), 0);
    assert_eq!(v2.get(SETTINGS, "theme").unwrap(), Some(json!("dark")));
}

#[test]
fn sqlite_reopen_same_version_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(sqlite_file(&dir), NEWS_DB_NAME, 2, &plan()).unwrap();
    store
        .put(NEWS, None, &json!({"link": "https://x/1", "title": "kept"}))
        .unwrap();
    store.put(SETTINGS, Some("theme".into()), &json!("dark")).unwrap();
    store.close().unwrap();

    let store = Store::open(sqlite_file(&dir), NEWS_DB_NAME, 2, &plan()).unwrap();
    assert_eq!(store.version().unwrap(), 2);
    assert_eq!(store.count(NEWS).unwrap(), 1);
    assert_eq!(
        store.get(NEWS, "https://x/1").unwrap().unwrap()["title"],
        "kept"
    );
    assert_eq!(store.get(SETTINGS, "theme").unwrap(), Some(json!("dark")));
    store.close().unwrap();

    assert_eq!(sqlite_file(&dir).stored_version().unwrap(), 2);
}

#[test]
fn sqlite_downgrade_leaves_database_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    Store::open(sqlite_file(&dir), NEWS_DB_NAME, 2, &plan())
        .unwrap()
        .close()
        .unwrap();

    let err = Store::open(sqlite_file(&dir), NEWS_DB_NAME, 1, &plan()).unwrap_err();
    assert!(err.is_version_error());
    assert_eq!(sqlite_file(&dir).stored_version().unwrap(), 2);
}

#[test]
fn sqlite_failed_upgrade_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(sqlite_file(&dir), NEWS_DB_NAME, 2, &plan()).unwrap();
    store
        .put(SETTINGS, Some("lang".into()), &json!("en"))
        .unwrap();
    store.close().unwrap();

    let err = Store::open(sqlite_file(&dir), NEWS_DB_NAME, 3, &broken_plan()).unwrap_err();
    assert!(err.is_migration_error());

    let backend = sqlite_file(&dir);
    assert_eq!(backend.stored_version().unwrap(), 2);
    assert_eq!(backend.partitions().unwrap().len(), 2);
    let store = Store::open(backend, NEWS_DB_NAME, 2, &plan()).unwrap();
    assert_eq!(store.get(SETTINGS, "lang").unwrap(), Some(json!("en")));
}

#[test]
fn sqlite_unreadable_file_is_storage_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("news-db.sqlite3"), b"definitely not sqlite").unwrap();

    let registry = StoreRegistry::sqlite(StoreConfig::at(dir.path()));
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let err = runtime
        .block_on(open_news_db(&registry))
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, StoreError::StorageUnavailable { .. }), "{err}");
}

// ── Plan and key behaviour ──────────────────────────────────────────

#[test]
fn v0_to_v2_in_one_pass() {
    let backend = MemoryBackend::new();
    let store = Store::open(backend.clone(), NEWS_DB_NAME, 2, &plan()).unwrap();
    assert_eq!(store.version().unwrap(), 2);

    let expected: Vec<PartitionSchema> = plan()
        .expected_schema(2)
        .unwrap()
        .iter()
        .map(|(name, key)| PartitionSchema {
            name: name.to_string(),
            key: key.clone(),
        })
        .collect();
    assert_eq!(backend.partitions().unwrap(), expected);
    assert_eq!(store.partitions().unwrap(), expected);
}

#[test]
fn article_written_at_v2_reads_back() {
    let store = Store::open(MemoryBackend::new(), NEWS_DB_NAME, 2, &plan()).unwrap();
    let record = json!({"link": "https://x/1", "title": "T"});
    let key = store.put(NEWS, None, &record).unwrap();

    assert_eq!(key, Key::from("https://x/1"));
    assert_eq!(store.get(NEWS, "https://x/1").unwrap(), Some(record));
}

#[test]
fn v1_article_without_link_rejected_at_v2() {
    let store = Store::open(MemoryBackend::new(), NEWS_DB_NAME, 2, &plan()).unwrap();
    let err = store
        .put(NEWS, None, &json!({"id": "a1", "title": "no link"}))
        .unwrap_err();
    assert!(matches!(err, StoreError::Data(_)));
}

#[test]
fn settings_keys_list_in_order() {
    let store = Store::open(MemoryBackend::new(), NEWS_DB_NAME, 2, &plan()).unwrap();
    for key in [Key::from("zoom"), Key::Int(7), Key::from("accent"), Key::Int(-1)] {
        store.put(SETTINGS, Some(key.clone()), &key.to_value()).unwrap();
    }

    let keys = store.keys(SETTINGS).unwrap();
    assert_eq!(
        keys,
        vec![Key::Int(-1), Key::Int(7), Key::from("accent"), Key::from("zoom")]
    );
}

// ── Registry ────────────────────────────────────────────────────────

#[tokio::test]
async fn registry_shares_and_upgrades_handles() {
    let registry = StoreRegistry::memory();
    let plan = Arc::new(plan());

    let v1 = registry.open(NEWS_DB_NAME, 1, Arc::clone(&plan)).await.unwrap();
    let same = registry.open(NEWS_DB_NAME, 1, Arc::clone(&plan)).await.unwrap();
    same.put(SETTINGS, Some("a".into()), &json!(1)).unwrap();
    assert_eq!(v1.get(SETTINGS, "a").unwrap(), Some(json!(1)));

    let v2 = registry.open(NEWS_DB_NAME, 2, Arc::clone(&plan)).await.unwrap();
    assert_eq!(v1.version().unwrap(), 2);
    assert_eq!(v2.get(SETTINGS, "a").unwrap(), Some(json!(1)));

    let err = registry.open(NEWS_DB_NAME, 1, plan).await.unwrap_err();
    assert!(err.is_version_error());
}

#[tokio::test]
async fn handle_from_before_close_cannot_touch_upgraded_news() {
    let registry = StoreRegistry::memory();
    let plan = Arc::new(plan());

    let old = registry.open(NEWS_DB_NAME, 1, Arc::clone(&plan)).await.unwrap();
    assert!(registry.close(NEWS_DB_NAME).await.unwrap());
    let new = registry.open(NEWS_DB_NAME, 2, plan).await.unwrap();

    let err = old
        .put(NEWS, None, &json!({"id": "a1", "title": "stale"}))
        .unwrap_err();
    assert!(matches!(err, StoreError::Closed(_)), "{err}");
    assert!(matches!(old.version(), Err(StoreError::Closed(_))));

    assert_eq!(new.version().unwrap(), 2);
    assert!(new.keys(NEWS).unwrap().is_empty());
    assert!(new.list_as::<Article>(NEWS).unwrap().is_empty());
}

#[tokio::test]
async fn sqlite_data_survives_fresh_registry() {
    let dir = tempfile::tempdir().unwrap();

    {
        let registry = StoreRegistry::sqlite(StoreConfig::at(dir.path()));
        let db = open_news_db(&registry).await.unwrap();
        let mut article = Article::new("https://x/keep", "Kept");
        article.read = true;
        db.save_article(&article).unwrap();
        db.set_setting("refresh_minutes", &15).unwrap();
        drop(db);
        registry.close_all().await.unwrap();
    }

    assert!(dir.path().join("news-db.sqlite3").exists());

    let registry = StoreRegistry::sqlite(StoreConfig::at(dir.path()));
    let db = open_news_db(&registry).await.unwrap();
    let article = db.article("https://x/keep").unwrap().unwrap();
    assert!(article.read);
    assert_eq!(db.setting::<u32>("refresh_minutes").unwrap(), Some(15));
}

#[tokio::test]
async fn concurrent_opens_resolve_to_one_upgrade() {
    let registry = Arc::new(StoreRegistry::memory());
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            open_news_db(&*registry).await.map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(registry.open_names().await, vec![NEWS_DB_NAME]);
}

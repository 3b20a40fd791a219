//! The `news-db` database used by the reader app.
//!
//! | version | `news`                          | `settings`   |
//! |---------|---------------------------------|--------------|
//! | 1       | keyed by `id`                   | external key |
//! | 2       | keyed by `link` (v1 data lost)  | external key |
//!
//! New layouts are added by appending a step to [`news_migrations`] and
//! bumping [`NEWS_DB_VERSION`]. Existing steps never change.

use std::collections::BTreeMap;
use std::sync::Arc;

use newsdb_migrate::{FnStep, KeyDef, MigrationError, MigrationPlan};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::db::Store;
use crate::error::StoreError;
use crate::key::Key;
use crate::registry::StoreRegistry;
use crate::traits::Transactional;

/// Name of the database.
pub const NEWS_DB_NAME: &str = "news-db";
/// Version the current release opens at.
pub const NEWS_DB_VERSION: u32 = 2;
/// Partition holding [`Article`]s.
pub const NEWS: &str = "news";
/// Partition holding settings under caller-chosen keys.
pub const SETTINGS: &str = "settings";

/// Schema history of `news-db`.
pub fn news_migrations() -> Result<MigrationPlan, MigrationError> {
    MigrationPlan::from_steps([
        Box::new(FnStep::new(1, "news by id, settings", |db| {
            db.ensure_partition(NEWS, KeyDef::path("id"))?;
            db.ensure_partition(SETTINGS, KeyDef::External)?;
            Ok(())
        })) as Box<dyn newsdb_migrate::MigrationStep>,
        Box::new(FnStep::new(2, "news by link", |db| {
            // Drops every v1 article.
            db.recreate_partition(NEWS, KeyDef::path("link"))?;
            db.ensure_partition(SETTINGS, KeyDef::External)?;
            Ok(())
        })),
    ])
}

/// A news item as the reader stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Canonical URL. Primary key since v2.
    pub link: String,
    pub title: String,
    /// Feed-provided id. Primary key in v1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Feed the article came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default)]
    pub read: bool,
    /// Fields this version does not know about, kept as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Article {
    pub fn new(link: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
            id: None,
            summary: None,
            source: None,
            published: None,
            read: false,
            extra: BTreeMap::new(),
        }
    }
}

/// Open `news-db` at the current version through `registry`.
///
/// This is the one place the app gets its database handle from.
pub async fn open_news_db<B: Transactional>(
    registry: &StoreRegistry<B>,
) -> Result<NewsDb<B>, StoreError> {
    let plan = news_migrations().map_err(StoreError::Plan)?;
    let store = registry
        .open(NEWS_DB_NAME, NEWS_DB_VERSION, Arc::new(plan))
        .await?;
    Ok(NewsDb::from_store(store))
}

/// Typed access to the `news-db` partitions.
#[derive(Debug)]
pub struct NewsDb<B: Transactional> {
    store: Store<B>,
}

impl<B: Transactional> Clone for NewsDb<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<B: Transactional> NewsDb<B> {
    pub fn from_store(store: Store<B>) -> Self {
        Self { store }
    }

    /// The underlying handle, for untyped access.
    pub fn store(&self) -> &Store<B> {
        &self.store
    }

    /// Insert or replace an article by its link.
    pub fn save_article(&self, article: &Article) -> Result<Key, StoreError> {
        self.store.put_as(NEWS, None, article)
    }

    pub fn article(&self, link: &str) -> Result<Option<Article>, StoreError> {
        self.store.get_as(NEWS, link)
    }

    /// All articles ordered by link.
    pub fn articles(&self) -> Result<Vec<Article>, StoreError> {
        Ok(self
            .store
            .list_as(NEWS)?
            .into_iter()
            .map(|(_, article)| article)
            .collect())
    }

    pub fn remove_article(&self, link: &str) -> Result<bool, StoreError> {
        self.store.delete(NEWS, link)
    }

    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.store.get_as(SETTINGS, key)
    }

    pub fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.store.put_as(SETTINGS, Some(Key::from(key)), value)?;
        Ok(())
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool, StoreError> {
        self.store.delete(SETTINGS, key)
    }
}

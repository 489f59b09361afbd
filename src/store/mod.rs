// src/store/mod.rs
//! Persistence boundary: articles, subscribers and the stats record.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::errors::RelayError;
use crate::stats::{CountMap, DeliveryStats};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A persisted article. `link` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub link: String,
    pub source: String,
    pub category: String,
    pub sentiment: f64,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub image_url: Option<String>,
    pub delivered: bool,
}

/// Insert payload; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub title: String,
    pub link: String,
    pub source: String,
    pub category: String,
    pub sentiment: f64,
    pub published_at: DateTime<Utc>,
    pub summary: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleGroup {
    Source,
    Category,
    /// keys `delivered` / `pending`
    DeliveryState,
}

/// Predicate for the random fallback pick.
#[derive(Debug, Clone)]
pub struct RandomPick {
    pub since: DateTime<Utc>,
    /// strict lower bound on sentiment
    pub min_sentiment: f64,
    /// Tried first; the whole window is used when none of these match.
    pub preferred_sources: Vec<String>,
    /// Never picked, e.g. articles already attempted this cycle.
    pub exclude_ids: Vec<i64>,
}

impl RandomPick {
    pub(crate) fn matches(&self, a: &Article) -> bool {
        !a.delivered
            && a.published_at >= self.since
            && a.sentiment > self.min_sentiment
            && !self.exclude_ids.contains(&a.id)
    }
}

/// Timestamps are stored at whole-second precision.
pub(crate) fn stored_ts(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(0)
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn link_exists(&self, link: &str) -> Result<bool, RelayError>;

    /// Insert unless the link is already known. `None` means the row existed
    /// and nothing changed.
    async fn insert_article(&self, article: NewArticle) -> Result<Option<Article>, RelayError>;

    async fn get_article(&self, id: i64) -> Result<Option<Article>, RelayError>;

    /// Flip `delivered` to true. Returns false if it already was (or the id is unknown).
    async fn mark_delivered(&self, id: i64) -> Result<bool, RelayError>;

    /// Undelivered articles published at or after `since`, oldest id first.
    async fn undelivered_since(&self, since: DateTime<Utc>) -> Result<Vec<Article>, RelayError>;

    async fn random_undelivered(&self, pick: &RandomPick) -> Result<Option<Article>, RelayError>;

    /// Undelivered, published since `since`, sentiment above `min_sentiment`;
    /// best sentiment first, then newest.
    async fn backfill_candidates(
        &self,
        since: DateTime<Utc>,
        min_sentiment: f64,
        limit: usize,
    ) -> Result<Vec<Article>, RelayError>;

    async fn count_by(&self, group: ArticleGroup) -> Result<CountMap, RelayError>;

    async fn article_count(&self) -> Result<u64, RelayError>;

    /// True when the subscriber was newly added.
    async fn add_subscriber(&self, user_id: i64) -> Result<bool, RelayError>;

    /// True when the subscriber existed.
    async fn remove_subscriber(&self, user_id: i64) -> Result<bool, RelayError>;

    async fn subscriber_ids(&self) -> Result<Vec<i64>, RelayError>;

    async fn subscriber_count(&self) -> Result<u64, RelayError>;

    async fn load_stats(&self) -> Result<Option<DeliveryStats>, RelayError>;

    async fn save_stats(&self, stats: &DeliveryStats) -> Result<(), RelayError>;
}

pub type SharedStore = Arc<dyn Store>;

/// `memory` selects the in-process store; anything else is a sqlx SQLite URL.
pub async fn open(database_url: &str) -> anyhow::Result<SharedStore> {
    if database_url.eq_ignore_ascii_case("memory") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(database_url).await?;
    Ok(Arc::new(store))
}

// src/store/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use std::collections::BTreeSet;
use std::sync::Mutex;

use super::{stored_ts, Article, ArticleGroup, NewArticle, RandomPick, Store};
use crate::errors::RelayError;
use crate::stats::{CountMap, DeliveryStats};

#[derive(Debug, Default)]
struct Inner {
    articles: Vec<Article>,
    next_id: i64,
    subscribers: BTreeSet<i64>,
    stats: Option<DeliveryStats>,
}

/// Process-local store for tests and `DATABASE_URL=memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Every stored article, in insertion order.
    pub fn articles(&self) -> Vec<Article> {
        self.lock().articles.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn link_exists(&self, link: &str) -> Result<bool, RelayError> {
        Ok(self.lock().articles.iter().any(|a| a.link == link))
    }

    async fn insert_article(&self, a: NewArticle) -> Result<Option<Article>, RelayError> {
        let mut g = self.lock();
        if g.articles.iter().any(|x| x.link == a.link) {
            return Ok(None);
        }
        g.next_id += 1;
        let row = Article {
            id: g.next_id,
            title: a.title,
            link: a.link,
            source: a.source,
            category: a.category,
            sentiment: a.sentiment,
            published_at: stored_ts(a.published_at),
            created_at: stored_ts(Utc::now()),
            summary: a.summary,
            image_url: a.image_url,
            delivered: false,
        };
        g.articles.push(row.clone());
        Ok(Some(row))
    }

    async fn get_article(&self, id: i64) -> Result<Option<Article>, RelayError> {
        Ok(self.lock().articles.iter().find(|a| a.id == id).cloned())
    }

    async fn mark_delivered(&self, id: i64) -> Result<bool, RelayError> {
        let mut g = self.lock();
        match g.articles.iter_mut().find(|a| a.id == id) {
            Some(a) if !a.delivered => {
                a.delivered = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn undelivered_since(&self, since: DateTime<Utc>) -> Result<Vec<Article>, RelayError> {
        let since = stored_ts(since);
        Ok(self
            .lock()
            .articles
            .iter()
            .filter(|a| !a.delivered && a.published_at >= since)
            .cloned()
            .collect())
    }

    async fn random_undelivered(&self, pick: &RandomPick) -> Result<Option<Article>, RelayError> {
        let g = self.lock();
        let pool: Vec<&Article> = g.articles.iter().filter(|a| pick.matches(a)).collect();
        let preferred: Vec<&Article> = pool
            .iter()
            .copied()
            .filter(|a| pick.preferred_sources.iter().any(|s| s == &a.source))
            .collect();

        let mut rng = rand::rng();
        let chosen = if preferred.is_empty() {
            pool.choose(&mut rng)
        } else {
            preferred.choose(&mut rng)
        };
        Ok(chosen.map(|a| (*a).clone()))
    }

    async fn backfill_candidates(
        &self,
        since: DateTime<Utc>,
        min_sentiment: f64,
        limit: usize,
    ) -> Result<Vec<Article>, RelayError> {
        let since = stored_ts(since);
        let mut v: Vec<Article> = self
            .lock()
            .articles
            .iter()
            .filter(|a| !a.delivered && a.published_at >= since && a.sentiment > min_sentiment)
            .cloned()
            .collect();
        v.sort_by(|a, b| {
            b.sentiment
                .total_cmp(&a.sentiment)
                .then(b.published_at.cmp(&a.published_at))
        });
        v.truncate(limit);
        Ok(v)
    }

    async fn count_by(&self, group: ArticleGroup) -> Result<CountMap, RelayError> {
        let g = self.lock();
        let mut m = CountMap::new();
        for a in &g.articles {
            match group {
                ArticleGroup::Source => m.increment(&a.source),
                ArticleGroup::Category => m.increment(&a.category),
                ArticleGroup::DeliveryState => {
                    m.increment(if a.delivered { "delivered" } else { "pending" })
                }
            }
        }
        Ok(m)
    }

    async fn article_count(&self) -> Result<u64, RelayError> {
        Ok(self.lock().articles.len() as u64)
    }

    async fn add_subscriber(&self, user_id: i64) -> Result<bool, RelayError> {
        Ok(self.lock().subscribers.insert(user_id))
    }

    async fn remove_subscriber(&self, user_id: i64) -> Result<bool, RelayError> {
        Ok(self.lock().subscribers.remove(&user_id))
    }

    async fn subscriber_ids(&self) -> Result<Vec<i64>, RelayError> {
        Ok(self.lock().subscribers.iter().copied().collect())
    }

    async fn subscriber_count(&self) -> Result<u64, RelayError> {
        Ok(self.lock().subscribers.len() as u64)
    }

    async fn load_stats(&self) -> Result<Option<DeliveryStats>, RelayError> {
        Ok(self.lock().stats.clone())
    }

    async fn save_stats(&self, stats: &DeliveryStats) -> Result<(), RelayError> {
        self.lock().stats = Some(stats.clone());
        Ok(())
    }
}

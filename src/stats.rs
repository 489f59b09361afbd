// src/stats.rs
//! Delivery statistics: totals plus explicit per-source / per-category counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::RelayError;
use crate::store::Store;

/// String -> count map with the few operations the stats and trend tables need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountMap(BTreeMap<String, u64>);

impl CountMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&mut self, key: &str, n: u64) {
        *self.0.entry(key.to_string()).or_insert(0) += n;
    }

    pub fn merge(&mut self, other: &CountMap) {
        for (k, v) in &other.0 {
            self.add(k, *v);
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Highest counts first; ties by key so the order is deterministic.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut v: Vec<(String, u64)> = self.0.iter().map(|(k, c)| (k.clone(), *c)).collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        v.truncate(n);
        v
    }

    /// Keep only the `n` highest entries.
    pub fn retain_top(&mut self, n: usize) {
        if self.0.len() > n {
            self.0 = self.top(n).into_iter().collect();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }
}

impl FromIterator<(String, u64)> for CountMap {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut m = CountMap::new();
        for (k, v) in iter {
            m.add(&k, v);
        }
        m
    }
}

/// Persisted stats record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub start_time: DateTime<Utc>,
    pub total_articles: u64,
    pub by_source: CountMap,
    pub by_category: CountMap,
    pub last_update: DateTime<Utc>,
}

impl DeliveryStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            start_time: now,
            total_articles: 0,
            by_source: CountMap::new(),
            by_category: CountMap::new(),
            last_update: now,
        }
    }

    pub fn add_article(&mut self, source: &str, category: &str, now: DateTime<Utc>) {
        self.total_articles += 1;
        self.by_source.increment(source);
        self.by_category.increment(category);
        self.last_update = now;
    }

    pub fn summary(&self, now: DateTime<Utc>) -> StatsSummary {
        let days_running = (now - self.start_time).num_days().max(0);
        let avg_per_day = self.total_articles as f64 / days_running.max(1) as f64;
        StatsSummary {
            total_articles: self.total_articles,
            days_running,
            avg_per_day,
            top_sources: self.by_source.top(5),
            top_categories: self.by_category.top(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub total_articles: u64,
    pub days_running: i64,
    pub avg_per_day: f64,
    pub top_sources: Vec<(String, u64)>,
    pub top_categories: Vec<(String, u64)>,
}

/// Stats service over the store; each update is load-modify-save.
#[derive(Clone)]
pub struct StatsRecorder {
    store: Arc<dyn Store>,
}

impl StatsRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn current(&self) -> Result<DeliveryStats, RelayError> {
        Ok(self
            .store
            .load_stats()
            .await?
            .unwrap_or_else(|| DeliveryStats::new(Utc::now())))
    }

    pub async fn add_article(&self, source: &str, category: &str) -> Result<(), RelayError> {
        let mut stats = self.current().await?;
        stats.add_article(source, category, Utc::now());
        self.store.save_stats(&stats).await
    }

    pub async fn summary(&self) -> Result<StatsSummary, RelayError> {
        Ok(self.current().await?.summary(Utc::now()))
    }
}

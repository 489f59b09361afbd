// src/cycle.rs
//! Cycle orchestrator: fetch -> ingest -> prioritize -> deliver, the drought
//! fallback, and the periodic timers that drive them.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::cache::ImageCache;
use crate::delivery::{DeliveryPump, DeliveryReport};
use crate::errors::ErrorLedger;
use crate::ingest::types::SourceProvider;
use crate::ingest::Ingestor;
use crate::prioritize::prioritize;
use crate::sources::SourceRegistry;
use crate::store::{Article, RandomPick, SharedStore};
use crate::trends::TrendTracker;

/// Fallback picks need sentiment strictly above this.
pub const FALLBACK_MIN_SENTIMENT: f64 = 0.3;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cycle_runs_total", "Completed fetch/deliver cycles.");
        describe_gauge!("cycle_last_run_ts", "Unix ts when the last cycle finished.");
        describe_counter!("fallback_sends_total", "Drought fallback send attempts.");
        describe_counter!("cache_hits_total", "Images served from the local cache.");
        describe_counter!("cache_evicted_total", "Expired cache files removed.");
        describe_counter!("notify_failures_total", "Subscriber notifications that failed.");
    });
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub new_articles: usize,
    pub failed_sources: usize,
    pub delivered: DeliveryReport,
    /// `Some(sent)` when the fallback path made an attempt.
    pub fallback: Option<bool>,
}

pub struct Orchestrator {
    ingestor: Ingestor,
    pump: DeliveryPump,
    store: SharedStore,
    registry: SourceRegistry,
    trends: Arc<TrendTracker>,
    ledger: Arc<ErrorLedger>,
    window: chrono::Duration,
    home_country: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ingestor: Ingestor,
        pump: DeliveryPump,
        store: SharedStore,
        registry: SourceRegistry,
        trends: Arc<TrendTracker>,
        ledger: Arc<ErrorLedger>,
        window: chrono::Duration,
        home_country: impl Into<String>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            ingestor,
            pump,
            store,
            registry,
            trends,
            ledger,
            window,
            home_country: home_country.into(),
        }
    }

    pub fn pump(&self) -> &DeliveryPump {
        &self.pump
    }

    /// One cycle over every registered source.
    pub async fn run_cycle(&self) -> CycleReport {
        let providers = self.ingestor.providers();
        self.run_cycle_with(&providers, Utc::now()).await
    }

    pub async fn run_cycle_with(&self, providers: &[Box<dyn SourceProvider>], start: DateTime<Utc>) -> CycleReport {
        tracing::info!(sources = providers.len(), "cycle started");
        let ingest = self.ingestor.run_with(providers, start).await;
        let mut report = CycleReport {
            new_articles: ingest.new_articles.len(),
            failed_sources: ingest.failed_sources.len(),
            ..CycleReport::default()
        };

        let mut attempted = Vec::new();
        if !ingest.new_articles.is_empty() {
            let batch = self.delivery_batch(ingest.new_articles, start).await;
            let plan = prioritize(batch, &self.registry, &self.home_country);
            attempted = plan.iter().map(|a| a.id).collect();
            report.delivered = self.pump.run(&plan).await;
        } else {
            tracing::info!("no new articles within the recency window");
        }

        if report.delivered.sent == 0 {
            report.fallback = self.fallback(start, attempted).await;
        }

        self.trends.persist().await;
        counter!("cycle_runs_total").increment(1);
        gauge!("cycle_last_run_ts").set(Utc::now().timestamp() as f64);

        let errors = self.ledger.total();
        if errors > 0 {
            tracing::warn!(total_errors = errors, "errors recorded so far");
        }
        tracing::info!(
            new = report.new_articles,
            sent = report.delivered.sent,
            failed = report.delivered.failed,
            fallback = ?report.fallback,
            "cycle finished"
        );
        report
    }

    /// New articles plus anything still undelivered inside the window, once each.
    async fn delivery_batch(&self, new_articles: Vec<Article>, start: DateTime<Utc>) -> Vec<Article> {
        let pending = match self.store.undelivered_since(start - self.window).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "could not load pending articles, sending new ones only");
                self.ledger.record_error(&e, "pending_batch");
                Vec::new()
            }
        };
        let mut seen = HashSet::new();
        new_articles
            .into_iter()
            .chain(pending)
            .filter(|a| seen.insert(a.id))
            .collect()
    }

    /// One random positive article from the window, local sources preferred.
    /// Articles already attempted this cycle are skipped. `None` when nothing
    /// qualifies.
    async fn fallback(&self, start: DateTime<Utc>, attempted: Vec<i64>) -> Option<bool> {
        let pick = RandomPick {
            since: start - self.window,
            min_sentiment: FALLBACK_MIN_SENTIMENT,
            preferred_sources: self.registry.local_names(&self.home_country),
            exclude_ids: attempted,
        };
        let article = match self.store.random_undelivered(&pick).await {
            Ok(Some(a)) => a,
            Ok(None) => {
                tracing::info!("no positive undelivered article for the fallback");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "fallback query failed");
                self.ledger.record_error(&e, "fallback_pick");
                return None;
            }
        };
        tracing::info!(article_id = article.id, title = %article.title, "fallback send");
        counter!("fallback_sends_total").increment(1);
        Some(self.pump.publish(&article).await)
    }
}

/// Run cycles forever: first after `first_delay`, then every `every`. A slow
/// cycle pushes the next tick back instead of bunching ticks up.
pub fn spawn_cycle_loop(orch: Arc<Orchestrator>, first_delay: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + first_delay, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            orch.run_cycle().await;
        }
    })
}

/// Purge expired cache files every `every`.
pub fn spawn_cache_cleanup(cache: Arc<ImageCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = cache.clear_expired().await;
            tracing::debug!(removed, "cache maintenance");
        }
    })
}

// src/ingest/mod.rs
pub mod feed;
pub mod scrape;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Instant;

use crate::classify::classify;
use crate::errors::{ErrorLedger, RelayError};
use crate::http::PageSource;
use crate::ingest::types::{RawCandidate, SourceProvider};
use crate::normalize::truncate_chars;
use crate::sentiment::SentimentAnalyzer;
use crate::sources::{ExtractionRules, FetchMode, SourceDescriptor, SourceRegistry};
use crate::store::{Article, NewArticle, SharedStore};
use crate::trends::TrendTracker;

/// Stored article bodies are capped so `read_more` replies fit one message.
pub const MAX_STORED_BODY_CHARS: usize = 3500;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_candidates_total", "Candidates parsed from sources.");
        describe_counter!("ingest_new_total", "Articles persisted as new.");
        describe_counter!(
            "ingest_skipped_existing_total",
            "Candidates whose link was already stored."
        );
        describe_counter!(
            "ingest_skipped_stale_total",
            "Candidates older than the recency window."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Source fetch/parse failures (isolated per source)."
        );
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_histogram!("ingest_source_ms", "Fetch + ingest time per source in milliseconds.");
    });
}

/// Fetches one source as described by its descriptor.
pub struct SourceFetcher {
    descriptor: SourceDescriptor,
    pages: Arc<dyn PageSource>,
}

impl SourceFetcher {
    pub fn new(descriptor: SourceDescriptor, pages: Arc<dyn PageSource>) -> Self {
        Self { descriptor, pages }
    }
}

#[async_trait]
impl SourceProvider for SourceFetcher {
    async fn fetch_latest(&self) -> Result<Vec<RawCandidate>, RelayError> {
        let d = &self.descriptor;
        let body = self
            .pages
            .fetch_page(&d.url)
            .await
            .map_err(|e| RelayError::source_fetch(&d.name, e))?;
        let now = Utc::now();
        match d.mode {
            FetchMode::Feed => feed::parse_feed(&body, &d.url, &d.name, now),
            FetchMode::Scrape => Ok(scrape::scrape_listing(&body, &d.url, &d.name, now)),
        }
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Fate {
    Stored(Article),
    Existing,
    Stale,
}

/// Per-cycle ingestion result.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub new_articles: Vec<Article>,
    pub candidates: usize,
    pub skipped_existing: usize,
    pub skipped_stale: usize,
    pub failed_sources: Vec<String>,
}

impl IngestReport {
    fn absorb(&mut self, other: IngestReport) {
        self.new_articles.extend(other.new_articles);
        self.candidates += other.candidates;
        self.skipped_existing += other.skipped_existing;
        self.skipped_stale += other.skipped_stale;
        self.failed_sources.extend(other.failed_sources);
    }
}

/// Dedupe, enrich and persist candidates from every source.
pub struct Ingestor {
    store: SharedStore,
    pages: Arc<dyn PageSource>,
    registry: SourceRegistry,
    trends: Arc<TrendTracker>,
    ledger: Arc<ErrorLedger>,
    analyzer: SentimentAnalyzer,
    window: chrono::Duration,
}

impl Ingestor {
    pub fn new(
        store: SharedStore,
        pages: Arc<dyn PageSource>,
        registry: SourceRegistry,
        trends: Arc<TrendTracker>,
        ledger: Arc<ErrorLedger>,
        window: chrono::Duration,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            pages,
            registry,
            trends,
            ledger,
            analyzer: SentimentAnalyzer::new(),
            window,
        }
    }

    /// One fetcher per registered source.
    pub fn providers(&self) -> Vec<Box<dyn SourceProvider>> {
        self.registry
            .all()
            .iter()
            .map(|d| Box::new(SourceFetcher::new(d.clone(), self.pages.clone())) as Box<dyn SourceProvider>)
            .collect()
    }

    /// Fetch every registered source concurrently and ingest the results.
    pub async fn run(&self, cycle_start: DateTime<Utc>) -> IngestReport {
        let providers = self.providers();
        self.run_with(&providers, cycle_start).await
    }

    /// Same as [`run`](Self::run) over an explicit provider list.
    pub async fn run_with(
        &self,
        providers: &[Box<dyn SourceProvider>],
        cycle_start: DateTime<Utc>,
    ) -> IngestReport {
        let per_source = join_all(
            providers
                .iter()
                .map(|p| self.ingest_source(p.as_ref(), cycle_start)),
        )
        .await;

        let mut report = IngestReport::default();
        for r in per_source {
            report.absorb(r);
        }
        tracing::info!(
            candidates = report.candidates,
            new = report.new_articles.len(),
            existing = report.skipped_existing,
            stale = report.skipped_stale,
            failed_sources = report.failed_sources.len(),
            "ingest finished"
        );
        report
    }

    async fn ingest_source(&self, provider: &dyn SourceProvider, cycle_start: DateTime<Utc>) -> IngestReport {
        let t0 = Instant::now();
        let name = provider.name().to_string();
        let mut report = IngestReport::default();

        let candidates = match provider.fetch_latest().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "source failed, skipping this cycle");
                counter!("ingest_source_errors_total").increment(1);
                self.ledger.record_error(&e, &format!("source_{name}"));
                report.failed_sources.push(name);
                return report;
            }
        };
        report.candidates = candidates.len();

        for c in candidates {
            let link = c.link.clone();
            match self.ingest_candidate(c, cycle_start).await {
                Ok(Fate::Stored(article)) => report.new_articles.push(article),
                Ok(Fate::Existing) => report.skipped_existing += 1,
                Ok(Fate::Stale) => report.skipped_stale += 1,
                Err(e) => {
                    tracing::warn!(source = %name, link = %link, error = %e, "candidate not stored");
                    self.ledger.record_error(&e, &format!("ingest_{name}"));
                }
            }
        }

        histogram!("ingest_source_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        if !report.new_articles.is_empty() {
            tracing::info!(source = %name, new = report.new_articles.len(), "new articles");
        } else {
            tracing::debug!(source = %name, "nothing new");
        }
        report
    }

    /// Existing links and stale entries are skipped; everything else is
    /// enriched and inserted. Insertion is per article.
    pub async fn ingest_candidate(
        &self,
        c: RawCandidate,
        cycle_start: DateTime<Utc>,
    ) -> Result<Fate, RelayError> {
        if self.store.link_exists(&c.link).await? {
            counter!("ingest_skipped_existing_total").increment(1);
            return Ok(Fate::Existing);
        }
        if c.published_at < cycle_start - self.window {
            tracing::debug!(link = %c.link, title = %c.title, "stale candidate");
            counter!("ingest_skipped_stale_total").increment(1);
            return Ok(Fate::Stale);
        }

        let descriptor = self.registry.get(&c.source_name);
        let rules = descriptor.map(|d| &d.extraction);
        let body = self.fetch_body(&c.link, rules).await.unwrap_or_else(|| c.summary.clone());
        let summary = truncate_chars(&body, MAX_STORED_BODY_CHARS);

        let category = match descriptor.and_then(|d| d.category.as_deref()) {
            Some(pinned) => pinned.to_string(),
            None => classify(&c.title, &summary).to_string(),
        };
        let sentiment = self.analyzer.ingest_score(&c.title, &summary);

        let inserted = self
            .store
            .insert_article(NewArticle {
                title: c.title,
                link: c.link,
                source: c.source_name,
                category,
                sentiment,
                published_at: c.published_at,
                summary,
                image_url: c.image_url,
            })
            .await?;

        let Some(article) = inserted else {
            // lost a race with another source carrying the same link
            counter!("ingest_skipped_existing_total").increment(1);
            return Ok(Fate::Existing);
        };
        counter!("ingest_new_total").increment(1);
        self.trends.observe(&article.title, &article.summary, &article.source);
        Ok(Fate::Stored(article))
    }

    /// Full article text from its page; `None` on any fetch or extraction miss.
    async fn fetch_body(&self, link: &str, rules: Option<&ExtractionRules>) -> Option<String> {
        let html = match self.pages.fetch_page(link).await {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(link = %link, error = %e, "article page unavailable, using feed summary");
                return None;
            }
        };
        let default_rules = ExtractionRules::default();
        scrape::extract_article_body(&html, rules.unwrap_or(&default_rules))
    }
}

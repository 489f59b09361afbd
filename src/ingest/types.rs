// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::RelayError;

/// One entry as a source reports it, before dedupe and enrichment.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RawCandidate {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub source_name: String,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Query the origin once. Each call re-fetches.
    async fn fetch_latest(&self) -> Result<Vec<RawCandidate>, RelayError>;
    fn name(&self) -> &str;
}

//! One-off sweep: publish the best undelivered articles of the past week.
//!
//! Usage: `backfill [LIMIT]` (default 5). Reads the same environment as the
//! service.

use anyhow::Context;
use chrono::{Duration, Utc};
use tracing_subscriber::EnvFilter;

use dz_news_relay::app::Relay;
use dz_news_relay::config::AppConfig;

const DEFAULT_LIMIT: usize = 5;
const LOOKBACK_DAYS: i64 = 7;
const MIN_SENTIMENT: f64 = 0.2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dz_news_relay=info,warn")),
        )
        .compact()
        .init();

    let limit = match std::env::args().nth(1) {
        Some(raw) => raw.parse::<usize>().with_context(|| format!("invalid limit {raw:?}"))?,
        None => DEFAULT_LIMIT,
    };

    let relay = Relay::build(AppConfig::from_env()?).await?;
    let since = Utc::now() - Duration::days(LOOKBACK_DAYS);
    let report = relay
        .orchestrator
        .pump()
        .backfill(since, MIN_SENTIMENT, limit)
        .await
        .context("backfill query failed")?;

    println!("backfill: sent={} failed={}", report.sent, report.failed);
    Ok(())
}

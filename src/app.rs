// src/app.rs
//! Component wiring shared by the service binary and the backfill tool.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cache::ImageCache;
use crate::commands::CommandHandler;
use crate::config::AppConfig;
use crate::cycle::Orchestrator;
use crate::delivery::{DeliveryPump, PumpSettings};
use crate::errors::ErrorLedger;
use crate::http::HttpClient;
use crate::ingest::Ingestor;
use crate::messaging::TelegramClient;
use crate::notify::Notifier;
use crate::sources::SourceRegistry;
use crate::store::{self, SharedStore};
use crate::trends::TrendTracker;

pub struct Relay {
    pub config: AppConfig,
    pub store: SharedStore,
    pub telegram: Arc<TelegramClient>,
    pub cache: Arc<ImageCache>,
    pub trends: Arc<TrendTracker>,
    pub ledger: Arc<ErrorLedger>,
    pub orchestrator: Arc<Orchestrator>,
    pub commands: Arc<CommandHandler>,
}

impl Relay {
    pub async fn build(config: AppConfig) -> Result<Self> {
        let registry = SourceRegistry::load_default(config.sources_path.as_deref())
            .context("loading the news source table")?;
        tracing::info!(sources = registry.len(), "source table loaded");

        let store = store::open(&config.database_url)
            .await
            .with_context(|| format!("opening store {}", config.database_url))?;

        let http = Arc::new(HttpClient::new(config.request_timeout, config.request_retry)?);
        let telegram = Arc::new(TelegramClient::new(
            &config.bot_token,
            config.request_timeout,
            config.send_retry,
        )?);
        let ledger = Arc::new(ErrorLedger::default());
        let trends = Arc::new(TrendTracker::load(config.analysis_path.clone()).await);
        let cache = Arc::new(ImageCache::new(
            config.cache_dir.clone(),
            config.cache_ttl,
            config.cache_enabled,
            http.clone(),
        ));
        let notifier = Arc::new(Notifier::new(store.clone(), telegram.clone(), ledger.clone()));

        let ingestor = Ingestor::new(
            store.clone(),
            http.clone(),
            registry.clone(),
            trends.clone(),
            ledger.clone(),
            config.recency_window,
        );
        let pump = DeliveryPump::new(
            telegram.clone(),
            store.clone(),
            http,
            cache.clone(),
            registry.clone(),
            notifier.clone(),
            ledger.clone(),
            PumpSettings {
                channel: config.channel_id.clone(),
                pacing: config.delivery_pacing,
                urgent_pacing: config.urgent_pacing,
                utc_offset_hours: config.home_utc_offset_hours,
            },
        );
        let orchestrator = Arc::new(Orchestrator::new(
            ingestor,
            pump,
            store.clone(),
            registry,
            trends.clone(),
            ledger.clone(),
            config.recency_window,
            config.home_country.clone(),
        ));
        let commands = Arc::new(CommandHandler::new(
            telegram.clone(),
            store.clone(),
            notifier,
            trends.clone(),
            config.home_utc_offset_hours,
        ));

        Ok(Self {
            config,
            store,
            telegram,
            cache,
            trends,
            ledger,
            orchestrator,
            commands,
        })
    }
}

//! News relay service: binary entrypoint.
//! Boots the supervisory HTTP server and, once started, the cycle timer, the
//! cache maintenance timer and the bot update loop on one cooperative runtime.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dz_news_relay::api::{self, AppState, RelayControl};
use dz_news_relay::app::Relay;
use dz_news_relay::commands::run_update_loop;
use dz_news_relay::config::AppConfig;
use dz_news_relay::cycle::{spawn_cache_cleanup, spawn_cycle_loop};
use dz_news_relay::metrics::Metrics;

/// Compact human logs by default, JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dz_news_relay=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // .env is optional; AppConfig::from_env loads it too, but the log filter may live there
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env().context("reading configuration")?;
    let metrics = Metrics::init()?;
    let port = config.port;
    let autostart = config.autostart;

    let relay = Relay::build(config).await?;
    let control = Arc::new(RelayControl::default());

    let state = AppState {
        control: control.clone(),
        ledger: relay.ledger.clone(),
        cache: relay.cache.clone(),
    };
    let router = api::router(state, &metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "supervisory HTTP listening");

    if autostart {
        control.request_start();
    } else {
        tracing::info!("AUTOSTART is off; waiting for /start-bot");
    }

    let relay_task = {
        let control = control.clone();
        tokio::spawn(async move {
            control.wait_for_start().await;
            start_relay(relay);
        })
    };

    axum::serve(listener, router).await.context("HTTP server stopped")?;
    relay_task.abort();
    Ok(())
}

fn start_relay(relay: Relay) {
    let cfg = &relay.config;
    tracing::info!(
        channel = %cfg.channel_id,
        every_secs = cfg.cycle_interval.as_secs(),
        first_in_secs = cfg.first_cycle_delay.as_secs(),
        "relay starting"
    );
    spawn_cycle_loop(relay.orchestrator.clone(), cfg.first_cycle_delay, cfg.cycle_interval);
    spawn_cache_cleanup(relay.cache.clone(), cfg.cache_cleanup_interval);
    tokio::spawn(run_update_loop(
        relay.telegram.clone(),
        relay.commands.clone(),
        relay.ledger.clone(),
    ));
}

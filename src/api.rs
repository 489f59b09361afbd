// src/api.rs
//! Supervisory HTTP surface. The relay itself does not depend on it; it only
//! reports status and lets an operator start a relay that was booted idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::Notify;
use tower_http::cors::CorsLayer;

use crate::cache::{CacheStats, ImageCache};
use crate::errors::{ErrorLedger, ErrorSnapshot};
use crate::metrics::Metrics;

/// Start latch shared by the HTTP surface and the process entrypoint.
#[derive(Debug, Default)]
pub struct RelayControl {
    running: AtomicBool,
    started: Notify,
}

impl RelayControl {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flip to running. False when it already was.
    pub fn request_start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.started.notify_one();
        true
    }

    /// Resolves once `request_start` has been called (immediately if it already was).
    pub async fn wait_for_start(&self) {
        if self.is_running() {
            return;
        }
        self.started.notified().await;
    }
}

#[derive(Clone)]
pub struct AppState {
    pub control: Arc<RelayControl>,
    pub ledger: Arc<ErrorLedger>,
    pub cache: Arc<ImageCache>,
}

pub fn router(state: AppState, metrics: &Metrics) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/start-bot", get(start_bot))
        .route("/debug/errors", get(debug_errors))
        .route("/debug/cache", get(debug_cache))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
        .merge(metrics.router())
}

fn bot_status(running: bool) -> &'static str {
    if running {
        "running"
    } else {
        "stopped"
    }
}

#[derive(Serialize)]
struct HomeOut {
    status: &'static str,
    bot_status: &'static str,
    message: &'static str,
}

async fn home(State(state): State<AppState>) -> Json<HomeOut> {
    Json(HomeOut {
        status: "running",
        bot_status: bot_status(state.control.is_running()),
        message: "بوت أخبار الجزائر يعمل بنجاح! 🚀",
    })
}

#[derive(Serialize)]
struct HealthOut {
    status: &'static str,
    timestamp: f64,
    bot_running: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthOut> {
    let now = chrono::Utc::now();
    Json(HealthOut {
        status: "healthy",
        timestamp: now.timestamp_millis() as f64 / 1000.0,
        bot_running: state.control.is_running(),
    })
}

#[derive(Serialize)]
struct StartOut {
    status: &'static str,
    message: &'static str,
}

async fn start_bot(State(state): State<AppState>) -> Json<StartOut> {
    if state.control.request_start() {
        tracing::info!("relay started over HTTP");
        Json(StartOut {
            status: "success",
            message: "تم تشغيل البوت بنجاح",
        })
    } else {
        Json(StartOut {
            status: "already_running",
            message: "البوت يعمل بالفعل",
        })
    }
}

async fn debug_errors(State(state): State<AppState>) -> Json<ErrorSnapshot> {
    Json(state.ledger.snapshot())
}

async fn debug_cache(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

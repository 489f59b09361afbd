// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod config;
pub mod errors;
pub mod retry;

// Source table and text handling
pub mod classify;
pub mod normalize;
pub mod sentiment;
pub mod sources;
pub mod trends;

// Persistence
pub mod stats;
pub mod store;

// Outbound I/O
pub mod cache;
pub mod http;
pub mod media;
pub mod messaging;

// Pipeline
pub mod cycle;
pub mod delivery;
pub mod ingest;
pub mod notify;
pub mod prioritize;

// Operator surfaces
pub mod api;
pub mod app;
pub mod commands;
pub mod metrics;

pub use crate::config::AppConfig;
pub use crate::cycle::Orchestrator;
pub use crate::errors::RelayError;
pub use crate::store::{Article, SharedStore, Store};

// src/config.rs
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://news.db?mode=rwc";

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub channel_id: String,
    pub database_url: String,

    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_dir: PathBuf,

    pub request_timeout: Duration,
    pub request_retry: RetryPolicy,
    pub send_retry: RetryPolicy,

    pub cycle_interval: Duration,
    pub first_cycle_delay: Duration,
    pub cache_cleanup_interval: Duration,
    pub delivery_pacing: Duration,
    pub urgent_pacing: Duration,
    pub recency_window: chrono::Duration,

    pub home_country: String,
    pub home_utc_offset_hours: i32,

    pub sources_path: Option<PathBuf>,
    pub analysis_path: PathBuf,

    pub port: u16,
    pub autostart: bool,
}

impl AppConfig {
    /// Load `.env` (if any) and read the process environment.
    /// Missing bot credentials are a fatal startup error.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; used by tests to avoid touching the environment.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |k: &str| -> Result<String> {
            match get(k).map(|v| v.trim().to_string()) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => bail!("missing required setting {k}"),
            }
        };
        let bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let channel_id = required("TELEGRAM_CHANNEL_ID")?;

        let max_retries: u32 = parse_or(&get, "MAX_RETRIES", 3)?;
        let retry_delay: u64 = parse_or(&get, "RETRY_DELAY", 5)?;
        let send_retries: u32 = parse_or(&get, "SEND_MAX_RETRIES", 2)?;

        Ok(Self {
            bot_token,
            channel_id,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),

            cache_enabled: parse_bool(get("CACHE_ENABLED").as_deref(), true),
            cache_ttl: secs(parse_or(&get, "CACHE_DURATION", 3600)?),
            cache_dir: PathBuf::from(get("CACHE_DIR").unwrap_or_else(|| "cache".into())),

            request_timeout: secs(parse_or(&get, "REQUEST_TIMEOUT", 30)?),
            request_retry: RetryPolicy::new(max_retries, secs(retry_delay)),
            send_retry: RetryPolicy::new(send_retries, secs(retry_delay)),

            cycle_interval: secs(parse_or(&get, "CYCLE_INTERVAL_SECS", 30)?),
            first_cycle_delay: secs(parse_or(&get, "FIRST_CYCLE_DELAY_SECS", 10)?),
            cache_cleanup_interval: secs(parse_or(&get, "CACHE_CLEANUP_SECS", 3600)?),
            delivery_pacing: secs(parse_or(&get, "DELIVERY_PACING_SECS", 30)?),
            urgent_pacing: secs(parse_or(&get, "URGENT_PACING_SECS", 30)?),
            recency_window: chrono::Duration::hours(parse_or(&get, "RECENCY_WINDOW_HOURS", 24)?),

            home_country: get("HOME_COUNTRY")
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "DZ".into()),
            home_utc_offset_hours: parse_or(&get, "HOME_UTC_OFFSET_HOURS", 1)?,

            sources_path: get("NEWS_SOURCES_PATH").map(PathBuf::from),
            analysis_path: PathBuf::from(
                get("ANALYSIS_PATH").unwrap_or_else(|| "news_analysis.json".into()),
            ),

            port: parse_or(&get, "PORT", 8000)?,
            autostart: parse_bool(get("AUTOSTART").as_deref(), true),
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.eq_ignore_ascii_case("memory")
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(default),
    }
}

fn parse_bool(raw: Option<&str>, default: bool) -> bool {
    match raw.map(|s| s.trim().to_ascii_lowercase()) {
        Some(s) if matches!(s.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(s) if matches!(s.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let err = AppConfig::from_lookup(lookup(&[("TELEGRAM_CHANNEL_ID", "@dz")])).unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));

        let err = AppConfig::from_lookup(lookup(&[("TELEGRAM_BOT_TOKEN", "t")])).unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_CHANNEL_ID"));
    }

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("TELEGRAM_CHANNEL_ID", "@dz"),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(cfg.cycle_interval, Duration::from_secs(30));
        assert_eq!(cfg.delivery_pacing, Duration::from_secs(30));
        assert_eq!(cfg.recency_window, chrono::Duration::hours(24));
        assert_eq!(cfg.request_retry.max_retries, 3);
        assert_eq!(cfg.send_retry.max_retries, 2);
        assert_eq!(cfg.home_country, "DZ");
        assert_eq!(cfg.port, 8000);
        assert!(cfg.cache_enabled && cfg.autostart);
        assert!(!cfg.uses_memory_store());
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("TELEGRAM_CHANNEL_ID", "-100123"),
            ("DATABASE_URL", "memory"),
            ("CACHE_ENABLED", "false"),
            ("DELIVERY_PACING_SECS", "0"),
            ("HOME_COUNTRY", "ma"),
        ]))
        .unwrap();
        assert!(cfg.uses_memory_store());
        assert!(!cfg.cache_enabled);
        assert_eq!(cfg.delivery_pacing, Duration::ZERO);
        assert_eq!(cfg.home_country, "MA");

        let err = AppConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("TELEGRAM_CHANNEL_ID", "@dz"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}

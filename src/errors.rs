//! Error taxonomy for the relay plus a rolling error ledger.
//!
//! Per-source and per-article failures are contained where they happen and
//! recorded in [`ErrorLedger`]; they never abort a cycle.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why the messaging platform refused a request. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectionKind {
    ChatNotFound,
    BotBlocked,
    MessageTooLong,
    FileTooLarge,
    Other,
}

impl RejectionKind {
    /// Classify a platform error description (case-insensitive).
    pub fn from_description(desc: &str) -> Self {
        let d = desc.to_lowercase();
        if d.contains("chat not found") {
            Self::ChatNotFound
        } else if d.contains("bot was blocked") || d.contains("blocked by the user") {
            Self::BotBlocked
        } else if d.contains("message is too long") || d.contains("caption is too long") {
            Self::MessageTooLong
        } else if d.contains("file too large") || d.contains("request entity too large") {
            Self::FileTooLarge
        } else {
            Self::Other
        }
    }

    /// Operator-facing hint logged next to the rejection.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::ChatNotFound => "chat not found: check TELEGRAM_CHANNEL_ID and bot membership",
            Self::BotBlocked => "bot was blocked by the recipient",
            Self::MessageTooLong => "message too long for the platform",
            Self::FileTooLarge => "file too large for the platform",
            Self::Other => "request rejected by the platform",
        }
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ChatNotFound => "chat_not_found",
            Self::BotBlocked => "bot_blocked",
            Self::MessageTooLong => "message_too_long",
            Self::FileTooLarge => "file_too_large",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Network or parse failure for one source; that source yields nothing this cycle.
    #[error("source `{source_name}` failed: {message}")]
    SourceFetch {
        source_name: String,
        message: String,
    },

    /// Request/send failure that the retry executor may repeat.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("platform rejected request ({kind}): {detail}")]
    PlatformRejection { kind: RejectionKind, detail: String },

    #[error("rate limited; retry after {retry_after:?}")]
    RateLimit { retry_after: Duration },

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl RelayError {
    pub fn source_fetch(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::SourceFetch {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Stable label used as the ledger key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceFetch { .. } => "SourceFetchError",
            Self::Transient(_) => "TransientDeliveryError",
            Self::PlatformRejection { .. } => "PlatformRejectionError",
            Self::RateLimit { .. } => "RateLimitError",
            Self::Persistence(_) => "PersistenceError",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimit { .. })
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(e: sqlx::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSample {
    pub ts: DateTime<Utc>,
    pub kind: String,
    pub message: String,
    pub context: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSnapshot {
    pub total_errors: u64,
    pub error_counts: BTreeMap<String, u64>,
    pub recent_errors: usize,
    pub last_errors: Vec<ErrorSample>,
}

/// Counts by error kind plus the last `cap` samples.
#[derive(Debug)]
pub struct ErrorLedger {
    inner: Mutex<LedgerInner>,
    cap: usize,
}

#[derive(Debug, Default)]
struct LedgerInner {
    counts: BTreeMap<String, u64>,
    samples: VecDeque<ErrorSample>,
}

impl Default for ErrorLedger {
    fn default() -> Self {
        Self::with_capacity(50)
    }
}

impl ErrorLedger {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            cap: cap.max(1),
        }
    }

    pub fn record_error(&self, err: &RelayError, context: &str) {
        self.record(err.kind(), &err.to_string(), context);
    }

    pub fn record(&self, kind: &str, message: &str, context: &str) {
        let sample = ErrorSample {
            ts: Utc::now(),
            kind: kind.to_string(),
            message: message.to_string(),
            context: context.to_string(),
        };
        let mut g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *g.counts.entry(kind.to_string()).or_insert(0) += 1;
        g.samples.push_back(sample);
        while g.samples.len() > self.cap {
            g.samples.pop_front();
        }
    }

    pub fn total(&self) -> u64 {
        let g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        g.counts.values().sum()
    }

    /// Totals, per-kind counts and the last 10 samples.
    pub fn snapshot(&self) -> ErrorSnapshot {
        let g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let start = g.samples.len().saturating_sub(10);
        ErrorSnapshot {
            total_errors: g.counts.values().sum(),
            error_counts: g.counts.clone(),
            recent_errors: g.samples.len(),
            last_errors: g.samples.iter().skip(start).cloned().collect(),
        }
    }
}

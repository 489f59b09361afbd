// src/notify.rs
//! Subscriber registry and best-effort fan-out of "new article" notices.

use metrics::counter;
use std::sync::Arc;

use crate::classify::display_name;
use crate::errors::{ErrorLedger, RelayError};
use crate::messaging::{Messenger, OutgoingMessage};
use crate::store::{Article, SharedStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub sent: usize,
    pub failed: usize,
}

pub struct Notifier {
    store: SharedStore,
    messenger: Arc<dyn Messenger>,
    ledger: Arc<ErrorLedger>,
}

pub fn notice_text(article: &Article) -> String {
    format!(
        "خبر جديد في فئة {}:\n{}\n{}",
        display_name(&article.category),
        article.title,
        article.link
    )
}

impl Notifier {
    pub fn new(store: SharedStore, messenger: Arc<dyn Messenger>, ledger: Arc<ErrorLedger>) -> Self {
        Self {
            store,
            messenger,
            ledger,
        }
    }

    /// True when the user was not subscribed before.
    pub async fn add_user(&self, user_id: i64) -> Result<bool, RelayError> {
        self.store.add_subscriber(user_id).await
    }

    /// True when the user had been subscribed.
    pub async fn remove_user(&self, user_id: i64) -> Result<bool, RelayError> {
        self.store.remove_subscriber(user_id).await
    }

    pub async fn subscriber_count(&self) -> Result<u64, RelayError> {
        self.store.subscriber_count().await
    }

    /// One plain-text notice per subscriber. A failed recipient is logged and
    /// skipped; the rest still get theirs.
    pub async fn notify_users(&self, article: &Article) -> FanOut {
        let ids = match self.store.subscriber_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "could not load subscribers");
                self.ledger.record_error(&e, "notify_subscribers");
                return FanOut::default();
            }
        };

        let text = notice_text(article);
        let mut out = FanOut::default();
        for id in ids {
            let msg = OutgoingMessage::plain(id.to_string(), text.clone());
            match self.messenger.send_text(&msg).await {
                Ok(()) => out.sent += 1,
                Err(e) => {
                    out.failed += 1;
                    tracing::warn!(user_id = id, error = %e, "notification failed");
                    counter!("notify_failures_total").increment(1);
                    self.ledger.record_error(&e, &format!("notify_{id}"));
                }
            }
        }
        out
    }
}

// src/delivery.rs
//! Message rendering and the paced, strictly sequential delivery pump.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ImageCache;
use crate::classify::{classify, emoji_for};
use crate::errors::{ErrorLedger, RelayError};
use crate::http::PageSource;
use crate::media::{find_video, is_valid_url, VideoRef};
use crate::messaging::{InlineButton, Keyboard, MediaSource, Messenger, OutgoingMessage};
use crate::normalize::{create_hashtags, enhance_title, format_local_date, prepare_article_content};
use crate::notify::Notifier;
use crate::prioritize::DeliveryPlan;
use crate::sources::SourceRegistry;
use crate::stats::StatsRecorder;
use crate::store::{Article, SharedStore};

/// Curated text shorter than this is left out of the post.
const MIN_CONTENT_CHARS: usize = 20;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("delivery_sent_total", "Articles published to the channel.");
        describe_counter!("delivery_failed_total", "Articles whose send failed after the text fallback.");
        describe_counter!(
            "delivery_text_fallback_total",
            "Media sends that failed and were retried as text."
        );
    });
}

/// HTML post body: emoji + title, curated summary, source link, local date, hashtags.
pub fn render_message(article: &Article, registry: &SourceRegistry, utc_offset_hours: i32) -> String {
    let category = classify(&article.title, &article.summary);
    let title = enhance_title(&article.title);
    let phrases = registry
        .get(&article.source)
        .map(|d| d.extraction.unwanted_phrases.as_slice())
        .unwrap_or_default();
    let content = prepare_article_content(&article.title, &article.summary, phrases);
    let hashtags = create_hashtags(&article.title, &content, &article.source, category);

    let mut msg = format!(
        "{} <b>{}</b>\n\n",
        emoji_for(category),
        html_escape::encode_text(&title)
    );
    if content.trim().chars().count() > MIN_CONTENT_CHARS {
        msg.push_str(&html_escape::encode_text(&content));
        msg.push_str("\n\n");
    }
    msg.push_str(&format!(
        "<a href='{}'>🔗 المصدر: {}</a>\n",
        html_escape::encode_single_quoted_attribute(&article.link),
        html_escape::encode_text(&article.source)
    ));
    msg.push_str(&format!("📅 {}\n\n", format_local_date(article.published_at, utc_offset_hours)));
    msg.push_str(&hashtags);
    msg
}

pub fn read_more_keyboard(article_id: i64) -> Keyboard {
    vec![vec![InlineButton::new("📰 قراءة المزيد", format!("read_more:{article_id}"))]]
}

/// Richest attachment available for one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Video(MediaSource),
    Photo(MediaSource),
    None,
}

/// How an article went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    WithVideo,
    WithPhoto,
    Text,
    /// The media send failed and the text-only retry went through.
    TextFallback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.sent += other.sent;
        self.failed += other.failed;
    }
}

pub struct PumpSettings {
    pub channel: String,
    pub pacing: Duration,
    pub urgent_pacing: Duration,
    pub utc_offset_hours: i32,
}

pub struct DeliveryPump {
    messenger: Arc<dyn Messenger>,
    store: SharedStore,
    pages: Arc<dyn PageSource>,
    cache: Arc<ImageCache>,
    registry: SourceRegistry,
    stats: StatsRecorder,
    notifier: Arc<Notifier>,
    ledger: Arc<ErrorLedger>,
    settings: PumpSettings,
}

impl DeliveryPump {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        messenger: Arc<dyn Messenger>,
        store: SharedStore,
        pages: Arc<dyn PageSource>,
        cache: Arc<ImageCache>,
        registry: SourceRegistry,
        notifier: Arc<Notifier>,
        ledger: Arc<ErrorLedger>,
        settings: PumpSettings,
    ) -> Self {
        ensure_metrics_described();
        Self {
            messenger,
            stats: StatsRecorder::new(store.clone()),
            store,
            pages,
            cache,
            registry,
            notifier,
            ledger,
            settings,
        }
    }

    /// Work out the attachment and final text. The article page is fetched to
    /// look for a video; a page that cannot be fetched simply has none.
    async fn plan_media(&self, article: &Article, mut text: String) -> (Attachment, String) {
        let video = if is_valid_url(&article.link) {
            match self.pages.fetch_page(&article.link).await {
                Ok(html) => find_video(&html, &article.link),
                Err(e) => {
                    tracing::debug!(link = %article.link, error = %e, "no page for video lookup");
                    None
                }
            }
        } else {
            None
        };

        if let Some(v) = video.as_ref().filter(|v| v.is_attachable()) {
            return (Attachment::Video(MediaSource::Url(v.url().to_string())), text);
        }
        if let Some(v) = &video {
            text.push_str(&format!(
                "\n\n🎬 <a href='{}'>شاهد الفيديو</a>",
                html_escape::encode_single_quoted_attribute(v.url())
            ));
        }

        let image = article
            .image_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| video.as_ref().and_then(VideoRef::thumbnail));
        match image {
            Some(url) => (Attachment::Photo(self.cache.get_cached_image(&url).await), text),
            None => (Attachment::None, text),
        }
    }

    /// One attempt with the richest media, then text only once.
    pub async fn send_article(&self, article: &Article) -> Result<Sent, RelayError> {
        let body = render_message(article, &self.registry, self.settings.utc_offset_hours);
        let (attachment, body) = self.plan_media(article, body).await;
        let msg = OutgoingMessage::html(self.settings.channel.clone(), body)
            .with_keyboard(read_more_keyboard(article.id));

        let first = match &attachment {
            Attachment::Video(v) => self.messenger.send_video(&msg, v).await.map(|_| Sent::WithVideo),
            Attachment::Photo(p) => self.messenger.send_photo(&msg, p).await.map(|_| Sent::WithPhoto),
            Attachment::None => return self.messenger.send_text(&msg).await.map(|_| Sent::Text),
        };
        match first {
            Ok(s) => Ok(s),
            Err(e) => {
                tracing::warn!(article_id = article.id, error = %e, "media send failed, retrying as text");
                self.ledger.record_error(&e, "send_article_media");
                counter!("delivery_text_fallback_total").increment(1);
                self.messenger.send_text(&msg).await.map(|_| Sent::TextFallback)
            }
        }
    }

    /// Send, then on success mark delivered, count it and notify subscribers.
    /// Returns whether the article went out.
    pub async fn publish(&self, article: &Article) -> bool {
        match self.send_article(article).await {
            Ok(how) => {
                tracing::info!(article_id = article.id, source = %article.source, ?how, "published");
                counter!("delivery_sent_total").increment(1);
                if let Err(e) = self.store.mark_delivered(article.id).await {
                    tracing::error!(article_id = article.id, error = %e, "sent but not marked delivered");
                    self.ledger.record_error(&e, "mark_delivered");
                }
                if let Err(e) = self.stats.add_article(&article.source, &article.category).await {
                    tracing::warn!(error = %e, "stats not updated");
                    self.ledger.record_error(&e, "stats");
                }
                let fan = self.notifier.notify_users(article).await;
                if fan.failed > 0 {
                    tracing::debug!(sent = fan.sent, failed = fan.failed, "subscriber fan-out");
                }
                true
            }
            Err(e) => {
                tracing::error!(article_id = article.id, title = %article.title, error = %e, "article not delivered");
                counter!("delivery_failed_total").increment(1);
                self.ledger.record_error(&e, "send_article_loop");
                false
            }
        }
    }

    async fn pump(&self, articles: &[Article], pause: Duration) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for a in articles {
            if self.publish(a).await {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
            if !pause.is_zero() {
                tracing::debug!(secs = pause.as_secs(), "pacing");
                tokio::time::sleep(pause).await;
            }
        }
        report
    }

    /// Urgent-local head on its own cadence, then the rest.
    pub async fn run(&self, plan: &DeliveryPlan) -> DeliveryReport {
        tracing::info!(urgent_local = plan.urgent_local.len(), rest = plan.rest.len(), "delivering");
        let mut report = self.pump(&plan.urgent_local, self.settings.urgent_pacing).await;
        report.merge(self.pump(&plan.rest, self.settings.pacing).await);
        report
    }

    /// Undelivered articles from the store, best sentiment first.
    pub async fn backfill(
        &self,
        since: DateTime<Utc>,
        min_sentiment: f64,
        limit: usize,
    ) -> Result<DeliveryReport, RelayError> {
        let articles = self.store.backfill_candidates(since, min_sentiment, limit).await?;
        tracing::info!(count = articles.len(), "backfill sweep");
        Ok(self.pump(&articles, self.settings.pacing).await)
    }
}

// src/commands.rs
//! Inbound bot commands and inline-button callbacks, plus the long-poll loop
//! that feeds them.

use std::sync::Arc;
use std::time::Duration;

use crate::classify::display_name;
use crate::errors::{ErrorLedger, RelayError};
use crate::messaging::{
    CallbackQuery, IncomingMessage, InlineButton, Keyboard, Messenger, OutgoingMessage, Update, UpdateSource,
};
use crate::normalize::format_local_date;
use crate::notify::Notifier;
use crate::stats::{DeliveryStats, StatsRecorder};
use crate::store::SharedStore;
use crate::trends::{SentimentTally, TrendSnapshot, TrendTracker};

const TRENDS_COMMAND_TOP: usize = 10;
const TRENDS_CALLBACK_TOP: usize = 15;
const SENTIMENT_SOURCES_SHOWN: usize = 5;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Subscribe,
    Unsubscribe,
    Stats,
    Trends,
}

/// `/name`, `/name@BotName` and trailing arguments are accepted; anything
/// else is not a command we handle.
pub fn parse_command(text: &str) -> Option<Command> {
    let head = text.split_whitespace().next()?;
    let name = head.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "subscribe" => Some(Command::Subscribe),
        "unsubscribe" => Some(Command::Unsubscribe),
        "stats" => Some(Command::Stats),
        "trends" => Some(Command::Trends),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    StatsGeneral,
    StatsTrending,
    StatsSentiment,
    ReadMore(i64),
    /// `read_more:` with an id that is not an integer.
    InvalidReadMore(String),
}

pub fn parse_callback(data: &str) -> Option<CallbackAction> {
    match data {
        "stats_general" => Some(CallbackAction::StatsGeneral),
        "stats_trending" => Some(CallbackAction::StatsTrending),
        "stats_sentiment" => Some(CallbackAction::StatsSentiment),
        _ => {
            let raw = data.strip_prefix("read_more:")?;
            Some(match raw.trim().parse::<i64>() {
                Ok(id) => CallbackAction::ReadMore(id),
                Err(_) => CallbackAction::InvalidReadMore(raw.to_string()),
            })
        }
    }
}

pub fn stats_keyboard() -> Keyboard {
    vec![
        vec![InlineButton::new("📊 الإحصائيات العامة", "stats_general")],
        vec![InlineButton::new("📈 المواضيع الرائجة", "stats_trending")],
        vec![InlineButton::new("😊 تحليل المشاعر", "stats_sentiment")],
    ]
}

pub fn back_keyboard() -> Keyboard {
    vec![vec![InlineButton::new("🔙 العودة للإحصائيات العامة", "stats_general")]]
}

pub fn welcome_text(first_name: &str, newly_added: bool) -> String {
    let name = html_escape::encode_text(first_name);
    if newly_added {
        format!(
            "👋 أهلاً بك يا {name}!\n\n\
             أنا بوت أخبار الجزائر، سأبقيك على اطلاع بآخر الأخبار من مصادر موثوقة.\n\n\
             تم اشتراكك بنجاح في نظام الإشعارات الفورية. ✅\n\
             لإلغاء الاشتراك في أي وقت، استخدم الأمر /unsubscribe."
        )
    } else {
        format!(
            "أهلاً بعودتك يا {name}! أنت مشترك بالفعل. 👍\n\n\
             لا داعي للاشتراك مرة أخرى. ستصلك آخر الأخبار فور ورودها."
        )
    }
}

pub fn stats_text(stats: &DeliveryStats, subscribers: u64, now: chrono::DateTime<chrono::Utc>, utc_offset_hours: i32) -> String {
    let summary = stats.summary(now);
    let mut text = String::from("📊 <b>إحصائيات بوت أخبار الجزائر</b> 📊\n\n");
    text.push_str(&format!("📰 <b>إجمالي الأخبار المنشورة:</b> {}\n", summary.total_articles));
    text.push_str(&format!("📆 <b>عدد أيام التشغيل:</b> {}\n", summary.days_running));
    text.push_str(&format!("📈 <b>متوسط الأخبار اليومي:</b> {:.1}\n", summary.avg_per_day));
    text.push_str(&format!("👥 <b>عدد المشتركين:</b> {subscribers}\n\n"));

    text.push_str("🔝 <b>أكثر المصادر نشاطاً:</b>\n");
    for (source, count) in &summary.top_sources {
        text.push_str(&format!("  • {}: {count} خبر\n", html_escape::encode_text(source)));
    }
    text.push_str("\n📋 <b>الأخبار حسب التصنيف:</b>\n");
    for (category, count) in &summary.top_categories {
        text.push_str(&format!("  • {}: {count} خبر\n", html_escape::encode_text(display_name(category))));
    }
    text.push_str(&format!(
        "\n🕒 <b>آخر تحديث:</b> {}\n",
        format_local_date(stats.last_update, utc_offset_hours)
    ));
    text.push_str("\n👇 اختر من القائمة أدناه لعرض المزيد من الإحصائيات");
    text
}

pub fn trending_text(topics: &[(String, u64)]) -> String {
    let mut text = String::from("📈 <b>المواضيع الرائجة في الأخبار</b> 📈\n\n");
    for (i, (topic, count)) in topics.iter().enumerate() {
        text.push_str(&format!("{}. <b>{}</b>: {count} مرة\n", i + 1, html_escape::encode_text(topic)));
    }
    if topics.is_empty() {
        text.push_str("لا توجد مواضيع رائجة حتى الآن.\n");
    }
    text
}

fn rounded(t: &SentimentTally) -> (u64, u64, u64) {
    let (p, n, u) = t.percentages();
    (p.round() as u64, n.round() as u64, u.round() as u64)
}

pub fn sentiment_text(snapshot: &TrendSnapshot) -> String {
    let overall = &snapshot.sentiment;
    let (pos, neg, neu) = rounded(overall);
    let mut text = String::from("😊 <b>تحليل المشاعر في الأخبار</b> 😊\n\n");
    text.push_str("<b>التوزيع العام للمشاعر:</b>\n");
    text.push_str(&format!("😃 إيجابي: {} ({pos}%)\n", overall.positive));
    text.push_str(&format!("😡 سلبي: {} ({neg}%)\n", overall.negative));
    text.push_str(&format!("😐 محايد: {} ({neu}%)\n\n", overall.neutral));

    text.push_str("<b>تحليل المشاعر حسب المصدر:</b>\n");
    for (source, tally) in snapshot.source_sentiment.iter().take(SENTIMENT_SOURCES_SHOWN) {
        if tally.total() == 0 {
            continue;
        }
        let (p, n, u) = rounded(tally);
        text.push_str(&format!(
            "<b>{}</b>: 😃 {p}% | 😡 {n}% | 😐 {u}%\n",
            html_escape::encode_text(source)
        ));
    }
    text
}

pub struct CommandHandler {
    messenger: Arc<dyn Messenger>,
    store: SharedStore,
    notifier: Arc<Notifier>,
    trends: Arc<TrendTracker>,
    stats: StatsRecorder,
    utc_offset_hours: i32,
}

impl CommandHandler {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        store: SharedStore,
        notifier: Arc<Notifier>,
        trends: Arc<TrendTracker>,
        utc_offset_hours: i32,
    ) -> Self {
        Self {
            messenger,
            stats: StatsRecorder::new(store.clone()),
            store,
            notifier,
            trends,
            utc_offset_hours,
        }
    }

    pub async fn handle_update(&self, update: &Update) -> Result<(), RelayError> {
        if let Some(q) = &update.callback_query {
            return self.handle_callback(q).await;
        }
        let Some(msg) = &update.message else {
            return Ok(());
        };
        match msg.text.as_deref().and_then(parse_command) {
            Some(cmd) => self.handle_command(cmd, msg).await,
            None => Ok(()),
        }
    }

    pub async fn handle_command(&self, cmd: Command, msg: &IncomingMessage) -> Result<(), RelayError> {
        let chat = msg.chat.id.to_string();
        let (user_id, first_name) = msg
            .from
            .as_ref()
            .map(|u| (u.id, u.first_name.as_str()))
            .unwrap_or((msg.chat.id, ""));
        tracing::info!(?cmd, user_id, "command");

        let reply = match cmd {
            Command::Start => {
                let added = self.notifier.add_user(user_id).await?;
                OutgoingMessage::html(chat, welcome_text(first_name, added))
            }
            Command::Subscribe => {
                let text = if self.notifier.add_user(user_id).await? {
                    "تم اشتراكك في نظام الإشعارات بنجاح. ✅"
                } else {
                    "أنت مشترك بالفعل. 👍"
                };
                OutgoingMessage::plain(chat, text)
            }
            Command::Unsubscribe => {
                let text = if self.notifier.remove_user(user_id).await? {
                    "تم إلغاء اشتراكك من نظام الإشعارات بنجاح. ✅\n\nيمكنك الاشتراك مجدداً في أي وقت باستخدام الأمر /start"
                } else {
                    "أنت غير مشترك في نظام الإشعارات. استخدم الأمر /start للاشتراك."
                };
                OutgoingMessage::plain(chat, text)
            }
            Command::Stats => {
                OutgoingMessage::html(chat, self.render_stats().await?).with_keyboard(stats_keyboard())
            }
            Command::Trends => {
                OutgoingMessage::html(chat, trending_text(&self.trends.top_topics(TRENDS_COMMAND_TOP)))
            }
        };
        self.messenger.send_text(&reply).await
    }

    async fn render_stats(&self) -> Result<String, RelayError> {
        let stats = self.stats.current().await?;
        let subscribers = self.store.subscriber_count().await?;
        Ok(stats_text(&stats, subscribers, chrono::Utc::now(), self.utc_offset_hours))
    }

    pub async fn handle_callback(&self, q: &CallbackQuery) -> Result<(), RelayError> {
        let Some(action) = q.data.as_deref().and_then(parse_callback) else {
            tracing::debug!(data = ?q.data, "unhandled callback");
            return self.messenger.answer_callback(&q.id, None, false).await;
        };
        let chat = q.message.as_ref().map_or(q.from.id, |m| m.chat.id).to_string();

        match action {
            CallbackAction::ReadMore(id) => self.read_more(q, &chat, id).await,
            CallbackAction::InvalidReadMore(raw) => {
                tracing::error!(raw = %raw, "read_more id is not an integer");
                self.messenger
                    .answer_callback(&q.id, Some("خطأ داخلي في قراءة المزيد."), true)
                    .await
            }
            stats_view => {
                self.messenger.answer_callback(&q.id, None, false).await?;
                let (text, keyboard) = match stats_view {
                    CallbackAction::StatsGeneral => (self.render_stats().await?, stats_keyboard()),
                    CallbackAction::StatsTrending => {
                        (trending_text(&self.trends.top_topics(TRENDS_CALLBACK_TOP)), back_keyboard())
                    }
                    _ => (sentiment_text(&self.trends.snapshot()), back_keyboard()),
                };
                match &q.message {
                    Some(m) => {
                        self.messenger
                            .edit_text(&chat, m.message_id, &text, Some(&keyboard))
                            .await
                    }
                    None => {
                        let msg = OutgoingMessage::html(chat, text).with_keyboard(keyboard);
                        self.messenger.send_text(&msg).await
                    }
                }
            }
        }
    }

    async fn read_more(&self, q: &CallbackQuery, chat: &str, id: i64) -> Result<(), RelayError> {
        let article = self.store.get_article(id).await?;
        tracing::info!(article_id = id, found = article.is_some(), "read more");
        match article {
            Some(a) => {
                self.messenger.answer_callback(&q.id, None, false).await?;
                let text = format!(
                    "<b>{}</b>\n\n{}",
                    html_escape::encode_text(&a.title),
                    html_escape::encode_text(&a.summary)
                );
                let msg = OutgoingMessage::html(chat, text).without_preview();
                self.messenger.send_text(&msg).await
            }
            None => {
                self.messenger
                    .answer_callback(&q.id, Some("عذراً، لم يتم العثور على هذا الخبر."), true)
                    .await
            }
        }
    }
}

/// Long-poll forever. Every update is handled in order; a failing handler
/// is logged and the offset still moves past it.
pub async fn run_update_loop(source: Arc<dyn UpdateSource>, handler: Arc<CommandHandler>, ledger: Arc<ErrorLedger>) {
    let mut offset = 0_i64;
    loop {
        let updates = match source.poll_updates(offset).await {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(error = %e, "getUpdates failed");
                ledger.record_error(&e, "poll_updates");
                let wait = match &e {
                    RelayError::RateLimit { retry_after } => *retry_after,
                    _ => POLL_ERROR_BACKOFF,
                };
                tokio::time::sleep(wait).await;
                continue;
            }
        };
        for u in &updates {
            offset = offset.max(u.update_id + 1);
            if let Err(e) = handler.handle_update(u).await {
                tracing::error!(update_id = u.update_id, error = %e, "update handler failed");
                ledger.record_error(&e, "handle_update");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_with_bot_suffix_and_args() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/stats@DzNewsBot"), Some(Command::Stats));
        assert_eq!(parse_command("  /trends now please"), Some(Command::Trends));
        assert_eq!(parse_command("/Unsubscribe"), Some(Command::Unsubscribe));
        assert_eq!(parse_command("start"), None);
        assert_eq!(parse_command("/help"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn callback_payloads() {
        assert_eq!(parse_callback("stats_sentiment"), Some(CallbackAction::StatsSentiment));
        assert_eq!(parse_callback("read_more:17"), Some(CallbackAction::ReadMore(17)));
        assert_eq!(
            parse_callback("read_more:abc"),
            Some(CallbackAction::InvalidReadMore("abc".into()))
        );
        assert_eq!(parse_callback("something_else"), None);
    }

    #[test]
    fn trending_empty_and_numbered() {
        assert!(trending_text(&[]).contains("لا توجد مواضيع رائجة حتى الآن."));
        let t = trending_text(&[("الجزائر".into(), 4), ("النفط".into(), 2)]);
        assert!(t.contains("1. <b>الجزائر</b>: 4 مرة\n2. <b>النفط</b>: 2 مرة\n"));
    }

    #[test]
    fn sentiment_percentages_are_rounded() {
        let mut snap = TrendSnapshot::default();
        snap.sentiment = SentimentTally {
            positive: 1,
            negative: 1,
            neutral: 1,
        };
        snap.source_sentiment.insert(
            "الخبر".into(),
            SentimentTally {
                positive: 2,
                negative: 1,
                neutral: 0,
            },
        );
        let t = sentiment_text(&snap);
        assert!(t.contains("😃 إيجابي: 1 (33%)"));
        assert!(t.contains("<b>الخبر</b>: 😃 67% | 😡 33% | 😐 0%"));
    }

    #[test]
    fn welcome_escapes_name() {
        let t = welcome_text("<Ali>", true);
        assert!(t.starts_with("👋 أهلاً بك يا &lt;Ali&gt;!"));
        assert!(welcome_text("Ali", false).starts_with("أهلاً بعودتك يا Ali!"));
    }
}

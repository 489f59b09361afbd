// tests/common/mod.rs
//
// In-memory doubles shared by the integration tests: a map-backed page
// source, a recording messenger and a scripted source provider.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dz_news_relay::cache::ImageCache;
use dz_news_relay::delivery::{DeliveryPump, PumpSettings};
use dz_news_relay::errors::{ErrorLedger, RelayError, RejectionKind};
use dz_news_relay::http::{Download, Downloader, PageSource};
use dz_news_relay::ingest::types::{RawCandidate, SourceProvider};
use dz_news_relay::messaging::{Keyboard, MediaSource, Messenger, OutgoingMessage};
use dz_news_relay::notify::Notifier;
use dz_news_relay::sources::{SourceDescriptor, SourceRegistry};
use dz_news_relay::store::{MemoryStore, NewArticle, SharedStore};

pub const CHANNEL: &str = "@dz_news_test";

// ---------- pages ----------

#[derive(Default)]
pub struct FakePages {
    pages: Mutex<HashMap<String, String>>,
    hits: Mutex<Vec<String>>,
}

impl FakePages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, body: &str) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), body.to_string());
        self
    }

    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for FakePages {
    async fn fetch_page(&self, url: &str) -> Result<String, RelayError> {
        self.hits.lock().unwrap().push(url.to_string());
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| RelayError::Transient(format!("404 for {url}")))
    }
}

#[async_trait]
impl Downloader for FakePages {
    async fn download(&self, url: &str) -> Result<Download, RelayError> {
        Err(RelayError::Transient(format!("no download for {url}")))
    }
}

// ---------- messenger ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    Text,
    Photo,
    Video,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub kind: SendKind,
    pub chat: String,
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub disable_preview: bool,
    pub media: Option<MediaSource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answered {
    pub callback_id: String,
    pub text: Option<String>,
    pub show_alert: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edited {
    pub chat: String,
    pub message_id: i64,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<SentMessage>>,
    pub answered: Mutex<Vec<Answered>>,
    pub edited: Mutex<Vec<Edited>>,
    fail_media: Mutex<bool>,
    fail_all: Mutex<bool>,
    fail_chats: Mutex<HashSet<String>>,
    fail_texts: Mutex<Vec<String>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_media(self) -> Self {
        *self.fail_media.lock().unwrap() = true;
        self
    }

    pub fn failing_everything(self) -> Self {
        *self.fail_all.lock().unwrap() = true;
        self
    }

    pub fn failing_chat(self, chat: &str) -> Self {
        self.fail_chats.lock().unwrap().insert(chat.to_string());
        self
    }

    /// Reject any send whose body contains `needle`.
    pub fn failing_text(self, needle: &str) -> Self {
        self.fail_texts.lock().unwrap().push(needle.to_string());
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat: &str) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.chat == chat).collect()
    }

    pub fn answered(&self) -> Vec<Answered> {
        self.answered.lock().unwrap().clone()
    }

    pub fn edited(&self) -> Vec<Edited> {
        self.edited.lock().unwrap().clone()
    }

    fn check(&self, msg: &OutgoingMessage, media: bool) -> Result<(), RelayError> {
        let text_blocked = self.fail_texts.lock().unwrap().iter().any(|n| msg.text.contains(n.as_str()));
        if *self.fail_all.lock().unwrap() || text_blocked || self.fail_chats.lock().unwrap().contains(&msg.chat) {
            return Err(RelayError::PlatformRejection {
                kind: RejectionKind::from_description("Forbidden: bot was blocked by the user"),
                detail: "Forbidden: bot was blocked by the user".into(),
            });
        }
        if media && *self.fail_media.lock().unwrap() {
            return Err(RelayError::PlatformRejection {
                kind: RejectionKind::from_description("Bad Request: wrong file identifier"),
                detail: "Bad Request: wrong file identifier".into(),
            });
        }
        Ok(())
    }

    fn record(&self, kind: SendKind, msg: &OutgoingMessage, media: Option<&MediaSource>) {
        self.sent.lock().unwrap().push(SentMessage {
            kind,
            chat: msg.chat.clone(),
            text: msg.text.clone(),
            keyboard: msg.keyboard.clone(),
            disable_preview: msg.disable_preview,
            media: media.cloned(),
        });
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, msg: &OutgoingMessage) -> Result<(), RelayError> {
        self.check(msg, false)?;
        self.record(SendKind::Text, msg, None);
        Ok(())
    }

    async fn send_photo(&self, msg: &OutgoingMessage, photo: &MediaSource) -> Result<(), RelayError> {
        self.check(msg, true)?;
        self.record(SendKind::Photo, msg, Some(photo));
        Ok(())
    }

    async fn send_video(&self, msg: &OutgoingMessage, video: &MediaSource) -> Result<(), RelayError> {
        self.check(msg, true)?;
        self.record(SendKind::Video, msg, Some(video));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, show_alert: bool) -> Result<(), RelayError> {
        self.answered.lock().unwrap().push(Answered {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            show_alert,
        });
        Ok(())
    }

    async fn edit_text(
        &self,
        chat: &str,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), RelayError> {
        self.edited.lock().unwrap().push(Edited {
            chat: chat.to_string(),
            message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }
}

// ---------- providers ----------

pub struct ScriptedProvider {
    pub name: String,
    pub result: Result<Vec<RawCandidate>, String>,
}

impl ScriptedProvider {
    pub fn ok(name: &str, items: Vec<RawCandidate>) -> Box<dyn SourceProvider> {
        Box::new(Self {
            name: name.to_string(),
            result: Ok(items),
        })
    }

    pub fn failing(name: &str) -> Box<dyn SourceProvider> {
        Box::new(Self {
            name: name.to_string(),
            result: Err("connection reset".into()),
        })
    }
}

#[async_trait]
impl SourceProvider for ScriptedProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawCandidate>, RelayError> {
        self.result
            .clone()
            .map_err(|m| RelayError::source_fetch(&self.name, m))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub fn candidate(source: &str, title: &str, link: &str, published_at: DateTime<Utc>) -> RawCandidate {
    RawCandidate {
        title: title.to_string(),
        link: link.to_string(),
        summary: format!("{title}. تفاصيل إضافية حول الخبر من المصدر."),
        published_at,
        source_name: source.to_string(),
        image_url: None,
    }
}

// ---------- fixtures ----------

pub fn descriptor(name: &str, country: &str, category: Option<&str>) -> SourceDescriptor {
    SourceDescriptor {
        name: name.to_string(),
        url: format!("https://{}.example/rss", name.replace(' ', "-")),
        mode: Default::default(),
        category: category.map(str::to_string),
        priority: 5,
        country: country.to_string(),
        extraction: Default::default(),
    }
}

/// Two Algerian sources, one regional.
pub fn registry() -> SourceRegistry {
    SourceRegistry::new(vec![
        descriptor("الشروق", "DZ", None),
        descriptor("الخبر", "DZ", Some("news")),
        descriptor("الجزيرة", "QA", None),
    ])
}

pub fn new_article(source: &str, title: &str, link: &str, sentiment: f64, published_at: DateTime<Utc>) -> NewArticle {
    NewArticle {
        title: title.to_string(),
        link: link.to_string(),
        source: source.to_string(),
        category: "عام".to_string(),
        sentiment,
        published_at,
        summary: format!("{title}. ملخص الخبر بتفاصيل كافية للعرض في القناة."),
        image_url: None,
    }
}

pub struct Harness {
    pub store: SharedStore,
    pub memory: Arc<MemoryStore>,
    pub messenger: Arc<RecordingMessenger>,
    pub pages: Arc<FakePages>,
    pub ledger: Arc<ErrorLedger>,
    pub notifier: Arc<Notifier>,
    pub cache: Arc<ImageCache>,
    pub cache_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(messenger: RecordingMessenger, pages: FakePages) -> Self {
        let memory = Arc::new(MemoryStore::new());
        let store: SharedStore = memory.clone();
        let messenger = Arc::new(messenger);
        let pages = Arc::new(pages);
        let ledger = Arc::new(ErrorLedger::default());
        let notifier = Arc::new(Notifier::new(store.clone(), messenger.clone(), ledger.clone()));
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ImageCache::new(
            cache_dir.path(),
            Duration::from_secs(3600),
            false,
            pages.clone(),
        ));
        Self {
            store,
            memory,
            messenger,
            pages,
            ledger,
            notifier,
            cache,
            cache_dir,
        }
    }

    /// Pump with zero pacing so tests never sleep.
    pub fn pump(&self, registry: SourceRegistry) -> DeliveryPump {
        self.paced_pump(registry, Duration::ZERO, Duration::ZERO)
    }

    pub fn paced_pump(&self, registry: SourceRegistry, pacing: Duration, urgent_pacing: Duration) -> DeliveryPump {
        DeliveryPump::new(
            self.messenger.clone(),
            self.store.clone(),
            self.pages.clone(),
            self.cache.clone(),
            registry,
            self.notifier.clone(),
            self.ledger.clone(),
            PumpSettings {
                channel: CHANNEL.to_string(),
                pacing,
                urgent_pacing,
                utc_offset_hours: 1,
            },
        )
    }
}

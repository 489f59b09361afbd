// src/messaging.rs
//! Messaging boundary: the [`Messenger`] trait the pipeline talks to, and a
//! Telegram Bot API client implementing it over reqwest.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{RejectionKind, RelayError};
use crate::http::DEFAULT_RATE_LIMIT_WAIT;
use crate::retry::{with_retry, RetryPolicy};

const API_BASE: &str = "https://api.telegram.org";

/// Where an attachment comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Url(String),
    LocalFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<InlineButton>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
}

impl ParseMode {
    fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
        }
    }
}

/// Body and options shared by every send primitive. For photos and videos
/// `text` becomes the caption.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub chat: String,
    pub text: String,
    pub parse_mode: Option<ParseMode>,
    pub keyboard: Option<Keyboard>,
    pub disable_preview: bool,
}

impl OutgoingMessage {
    pub fn plain(chat: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat: chat.into(),
            text: text.into(),
            parse_mode: None,
            keyboard: None,
            disable_preview: false,
        }
    }

    pub fn html(chat: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            parse_mode: Some(ParseMode::Html),
            ..Self::plain(chat, text)
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn without_preview(mut self) -> Self {
        self.disable_preview = true;
        self
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, msg: &OutgoingMessage) -> Result<(), RelayError>;
    async fn send_photo(&self, msg: &OutgoingMessage, photo: &MediaSource) -> Result<(), RelayError>;
    async fn send_video(&self, msg: &OutgoingMessage, video: &MediaSource) -> Result<(), RelayError>;
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, show_alert: bool) -> Result<(), RelayError>;
    async fn edit_text(
        &self,
        chat: &str,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), RelayError>;
}

// --- inbound updates (subset of the Bot API objects) ---

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// Source of inbound updates for the command loop.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Updates with id >= `offset`; blocks up to the client's poll timeout.
    async fn poll_updates(&self, offset: i64) -> Result<Vec<Update>, RelayError>;
}

// --- Bot API client ---

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Map a Bot API reply onto the error taxonomy: flood control -> rate limit,
/// 5xx -> transient, any other refusal -> rejection with a diagnostic kind.
fn into_result<T>(status: StatusCode, resp: ApiResponse<T>) -> Result<Option<T>, RelayError> {
    if resp.ok {
        return Ok(resp.result);
    }
    let code = resp.error_code.unwrap_or(status.as_u16());
    let detail = resp.description.unwrap_or_else(|| format!("HTTP {code}"));
    let retry_after = resp.parameters.and_then(|p| p.retry_after);

    if code == 429 || retry_after.is_some() {
        let wait = retry_after.map(Duration::from_secs).unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
        return Err(RelayError::RateLimit { retry_after: wait });
    }
    if code >= 500 {
        return Err(RelayError::Transient(detail));
    }
    let kind = RejectionKind::from_description(&detail);
    tracing::error!(kind = %kind, hint = kind.hint(), detail = %detail, "platform rejected request");
    Err(RelayError::PlatformRejection { kind, detail })
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base: String,
    policy: RetryPolicy,
    poll_timeout: Duration,
}

impl TelegramClient {
    pub fn new(token: &str, request_timeout: Duration, policy: RetryPolicy) -> anyhow::Result<Self> {
        Self::with_base_url(API_BASE, token, request_timeout, policy)
    }

    pub fn with_base_url(
        base_url: &str,
        token: &str,
        request_timeout: Duration,
        policy: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let poll_timeout = Duration::from_secs(25);
        let client = Client::builder()
            // long polls must outlive the server-side wait
            .timeout(request_timeout.max(poll_timeout + Duration::from_secs(10)))
            .build()
            .context("failed to build Telegram client")?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
            policy,
            poll_timeout,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    async fn decode<T: DeserializeOwned>(method: &str, resp: reqwest::Response) -> Result<Option<T>, RelayError> {
        let status = resp.status();
        let body: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| RelayError::Transient(format!("{method}: undecodable reply ({status}): {e}")))?;
        into_result(status, body)
    }

    async fn call_json<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> Result<Option<T>, RelayError> {
        let url = self.endpoint(method);
        with_retry(&self.policy, method, || async {
            let resp = self
                .client
                .post(&url)
                .json(payload)
                .send()
                .await
                .map_err(|e| RelayError::Transient(format!("{method}: {e}")))?;
            Self::decode(method, resp).await
        })
        .await
    }

    /// Upload a local file as `field` together with the message options.
    async fn call_upload(
        &self,
        method: &str,
        field: &'static str,
        msg: &OutgoingMessage,
        path: &Path,
    ) -> Result<(), RelayError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RelayError::Transient(format!("reading {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let keyboard = msg
            .keyboard
            .as_ref()
            .map(|k| json!({ "inline_keyboard": k }).to_string());
        let url = self.endpoint(method);

        with_retry(&self.policy, method, || async {
            let mut form = Form::new()
                .text("chat_id", msg.chat.clone())
                .text("caption", msg.text.clone())
                .part(field, Part::bytes(bytes.clone()).file_name(file_name.clone()));
            if let Some(pm) = msg.parse_mode {
                form = form.text("parse_mode", pm.as_str());
            }
            if let Some(k) = &keyboard {
                form = form.text("reply_markup", k.clone());
            }
            let resp = self
                .client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| RelayError::Transient(format!("{method}: {e}")))?;
            Self::decode::<Value>(method, resp).await.map(|_| ())
        })
        .await
    }

    async fn send_media(
        &self,
        method: &str,
        field: &'static str,
        msg: &OutgoingMessage,
        media: &MediaSource,
    ) -> Result<(), RelayError> {
        match media {
            MediaSource::LocalFile(path) => self.call_upload(method, field, msg, path).await,
            MediaSource::Url(u) => {
                let mut payload = message_payload(msg, "caption");
                payload[field] = json!(u);
                self.call_json::<Value>(method, &payload).await.map(|_| ())
            }
        }
    }
}

fn message_payload(msg: &OutgoingMessage, text_field: &str) -> Value {
    let mut payload = json!({ "chat_id": msg.chat });
    payload[text_field] = json!(msg.text);
    if let Some(pm) = msg.parse_mode {
        payload["parse_mode"] = json!(pm.as_str());
    }
    if let Some(k) = &msg.keyboard {
        payload["reply_markup"] = json!({ "inline_keyboard": k });
    }
    payload
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(&self, msg: &OutgoingMessage) -> Result<(), RelayError> {
        let mut payload = message_payload(msg, "text");
        payload["disable_web_page_preview"] = json!(msg.disable_preview);
        self.call_json::<Value>("sendMessage", &payload).await.map(|_| ())
    }

    async fn send_photo(&self, msg: &OutgoingMessage, photo: &MediaSource) -> Result<(), RelayError> {
        self.send_media("sendPhoto", "photo", msg, photo).await
    }

    async fn send_video(&self, msg: &OutgoingMessage, video: &MediaSource) -> Result<(), RelayError> {
        self.send_media("sendVideo", "video", msg, video).await
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, show_alert: bool) -> Result<(), RelayError> {
        let mut payload = json!({ "callback_query_id": callback_id, "show_alert": show_alert });
        if let Some(t) = text {
            payload["text"] = json!(t);
        }
        self.call_json::<Value>("answerCallbackQuery", &payload).await.map(|_| ())
    }

    async fn edit_text(
        &self,
        chat: &str,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), RelayError> {
        let mut payload = json!({
            "chat_id": chat,
            "message_id": message_id,
            "text": text,
            "parse_mode": ParseMode::Html.as_str(),
        });
        if let Some(k) = keyboard {
            payload["reply_markup"] = json!({ "inline_keyboard": k });
        }
        self.call_json::<Value>("editMessageText", &payload).await.map(|_| ())
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn poll_updates(&self, offset: i64) -> Result<Vec<Update>, RelayError> {
        let payload = json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        // polling has its own loop; no retry here
        let resp = self
            .client
            .post(self.endpoint("getUpdates"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::Transient(format!("getUpdates: {e}")))?;
        Ok(Self::decode::<Vec<Update>>("getUpdates", resp).await?.unwrap_or_default())
    }
}

// src/media.rs
//! Video discovery in article pages and YouTube helpers.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

static VIDEO: Lazy<Selector> = Lazy::new(|| Selector::parse("video").expect("static selector"));
static IFRAME: Lazy<Selector> = Lazy::new(|| Selector::parse("iframe[src]").expect("static selector"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

static RE_EMBED_HOST: Lazy<Regex> = Lazy::new(|| Regex::new(r"youtube|facebook|twitter|vimeo").unwrap());
static RE_VIDEO_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(mp4|avi|mov|wmv)$").unwrap());
static RE_YOUTUBE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"youtube\.com/watch|youtu\.be/").unwrap());
static RE_YOUTUBE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.)?(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/)([\w-]+)",
    )
    .unwrap()
});

/// A video found on an article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoRef {
    /// A file the messaging platform can fetch and attach.
    Direct(String),
    /// A player page (YouTube, Facebook...) that can only be linked.
    Embedded(String),
}

impl VideoRef {
    pub fn url(&self) -> &str {
        match self {
            VideoRef::Direct(u) | VideoRef::Embedded(u) => u,
        }
    }

    /// YouTube references are linked, never attached, even when found as a direct link.
    pub fn is_attachable(&self) -> bool {
        matches!(self, VideoRef::Direct(u) if !is_youtube_url(u))
    }

    pub fn thumbnail(&self) -> Option<String> {
        youtube_id(self.url()).map(|id| youtube_thumbnail(&id))
    }
}

pub fn is_valid_url(url: &str) -> bool {
    Url::parse(url).map(|u| u.has_host()).unwrap_or(false)
}

fn absolutize(page: &Url, raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    page.join(raw).map(|u| u.to_string()).unwrap_or_else(|_| raw.to_string())
}

/// Look for a video in an article page, in order: the first `<video src>`,
/// an embed iframe from a known platform, a link to a video file, a YouTube link.
pub fn find_video(html: &str, page_url: &str) -> Option<VideoRef> {
    let page = Url::parse(page_url).ok().filter(|u| u.has_host())?;
    let doc = Html::parse_document(html);

    if let Some(src) = doc
        .select(&VIDEO)
        .next()
        .and_then(|v| v.value().attr("src"))
        .filter(|s| !s.trim().is_empty())
    {
        return Some(VideoRef::Direct(absolutize(&page, src.trim())));
    }

    if let Some(src) = doc
        .select(&IFRAME)
        .filter_map(|f| f.value().attr("src"))
        .find(|s| RE_EMBED_HOST.is_match(s))
    {
        return Some(VideoRef::Embedded(src.to_string()));
    }

    let hrefs: Vec<&str> = doc.select(&ANCHOR).filter_map(|a| a.value().attr("href")).collect();

    if let Some(href) = hrefs.iter().find(|h| RE_VIDEO_FILE.is_match(h)) {
        return Some(VideoRef::Direct(absolutize(&page, href)));
    }

    hrefs
        .iter()
        .find(|h| RE_YOUTUBE_LINK.is_match(h))
        .map(|h| VideoRef::Embedded(h.to_string()))
}

pub fn is_youtube_url(url: &str) -> bool {
    RE_YOUTUBE_ID.is_match(url)
}

pub fn youtube_id(url: &str) -> Option<String> {
    RE_YOUTUBE_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn youtube_thumbnail(id: &str) -> String {
    format!("https://img.youtube.com/vi/{id}/hqdefault.jpg")
}

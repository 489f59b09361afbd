// src/ingest/feed.rs
//! RSS 2.0 / Atom parsing into raw candidates.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use url::Url;

use crate::errors::RelayError;
use crate::ingest::types::RawCandidate;
use crate::normalize::clean_html;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date")]
    dc_date: Option<String>,
    #[serde(rename = "media:content", default)]
    media_content: Vec<MediaRef>,
    #[serde(rename = "media:thumbnail", default)]
    media_thumbnail: Vec<MediaRef>,
    #[serde(rename = "enclosure", default)]
    enclosure: Vec<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct MediaRef {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@medium")]
    medium: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

static RE_IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']([^"']+)["']"#).unwrap());

/// RFC 2822 first (`pubDate`), then RFC 3339 (`dc:date`, Atom).
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(dt) = OffsetDateTime::parse(ts, &Rfc2822) {
        return DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0);
    }
    DateTime::parse_from_rfc2822(ts)
        .or_else(|_| DateTime::parse_from_rfc3339(ts))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn resolve(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    base.and_then(|b| b.join(raw).ok()).map(|u| u.to_string())
}

fn looks_like_image(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or_default();
    [".jpg", ".jpeg", ".png", ".gif", ".webp"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

fn item_image(it: &Item, base: Option<&Url>) -> Option<String> {
    let media = it.media_content.iter().find(|m| {
        let by_medium = m.medium.as_deref().map(|x| x == "image");
        let by_mime = m.mime.as_deref().map(|x| x.starts_with("image/"));
        match (by_medium, by_mime) {
            (Some(b), _) | (None, Some(b)) => b,
            (None, None) => m.url.as_deref().is_some_and(looks_like_image),
        }
    });
    if let Some(u) = media.and_then(|m| m.url.as_deref()).and_then(|u| resolve(base, u)) {
        return Some(u);
    }
    if let Some(u) = it
        .media_thumbnail
        .iter()
        .find_map(|m| m.url.as_deref().and_then(|u| resolve(base, u)))
    {
        return Some(u);
    }
    if let Some(u) = it
        .enclosure
        .iter()
        .filter(|e| e.mime.as_deref().is_some_and(|m| m.starts_with("image/")))
        .find_map(|e| e.url.as_deref().and_then(|u| resolve(base, u)))
    {
        return Some(u);
    }
    [it.content_encoded.as_deref(), it.description.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|html| RE_IMG_SRC.captures(html))
        .and_then(|c| c.get(1))
        .and_then(|m| resolve(base, &html_escape::decode_html_entities(m.as_str())))
}

/// Named entities that are valid HTML but break strict XML parsing.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&laquo;", "«")
        .replace("&raquo;", "»")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Parse an RSS 2.0 or Atom document. Entries without a title or link are
/// dropped; a missing date becomes `now`.
pub fn parse_feed(
    xml: &str,
    feed_url: &str,
    source_name: &str,
    now: DateTime<Utc>,
) -> Result<Vec<RawCandidate>, RelayError> {
    let t0 = std::time::Instant::now();
    let base = Url::parse(feed_url).ok();
    let xml = scrub_html_entities_for_xml(xml.trim_start_matches('\u{feff}'));

    let out = match from_str::<Rss>(&xml) {
        Ok(rss) => rss_candidates(rss, base.as_ref(), source_name, now),
        Err(rss_err) => match from_str::<AtomFeed>(&xml) {
            Ok(atom) => atom_candidates(atom, base.as_ref(), source_name, now),
            Err(_) => {
                return Err(RelayError::source_fetch(
                    source_name,
                    format!("feed parse: {rss_err}"),
                ))
            }
        },
    };

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("ingest_candidates_total").increment(out.len() as u64);
    Ok(out)
}

fn rss_candidates(
    rss: Rss,
    base: Option<&Url>,
    source_name: &str,
    now: DateTime<Utc>,
) -> Vec<RawCandidate> {
    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let title = clean_html(it.title.as_deref().unwrap_or_default());
        let link = it
            .link
            .as_deref()
            .or(it.guid.as_deref())
            .and_then(|l| resolve(base, l));
        let Some(link) = link.filter(|_| !title.is_empty()) else {
            continue;
        };
        let image_url = item_image(&it, base);
        let summary = clean_html(
            it.description
                .as_deref()
                .or(it.content_encoded.as_deref())
                .unwrap_or_default(),
        );
        let published_at = it
            .pub_date
            .as_deref()
            .or(it.dc_date.as_deref())
            .and_then(parse_feed_date)
            .unwrap_or(now);
        out.push(RawCandidate {
            title,
            link,
            summary,
            published_at,
            source_name: source_name.to_string(),
            image_url,
        });
    }
    out
}

fn atom_candidates(
    feed: AtomFeed,
    base: Option<&Url>,
    source_name: &str,
    now: DateTime<Utc>,
) -> Vec<RawCandidate> {
    let mut out = Vec::with_capacity(feed.entry.len());
    for e in feed.entry {
        let title = clean_html(e.title.as_ref().map(|t| t.value.as_str()).unwrap_or_default());
        let link = e
            .link
            .iter()
            .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
            .or(e.link.first())
            .and_then(|l| l.href.as_deref())
            .and_then(|h| resolve(base, h));
        let Some(link) = link.filter(|_| !title.is_empty()) else {
            continue;
        };
        let body_html = e
            .summary
            .as_ref()
            .or(e.content.as_ref())
            .map(|t| t.value.as_str())
            .unwrap_or_default();
        let image_url = RE_IMG_SRC
            .captures(body_html)
            .and_then(|c| c.get(1))
            .and_then(|m| resolve(base, m.as_str()));
        let published_at = e
            .published
            .as_deref()
            .or(e.updated.as_deref())
            .and_then(parse_feed_date)
            .unwrap_or(now);
        out.push(RawCandidate {
            title,
            link,
            summary: clean_html(body_html),
            published_at,
            source_name: source_name.to_string(),
            image_url,
        });
    }
    out
}

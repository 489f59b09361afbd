// src/ingest/scrape.rs
//! HTML scraping: generic listing pages and article bodies.
//!
//! `scraper::Html` is not `Send`; everything here is synchronous and callers
//! keep parsed documents out of their async state.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::ingest::types::RawCandidate;
use crate::normalize::clean_html;
use crate::sources::ExtractionRules;

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

static LIST_ITEM: Lazy<Selector> = Lazy::new(|| sel("div.article-item"));
static LIST_TITLE: Lazy<Selector> = Lazy::new(|| sel("h2.article-title"));
static LIST_LINK: Lazy<Selector> = Lazy::new(|| sel("a.article-link"));
static LIST_SUMMARY: Lazy<Selector> = Lazy::new(|| sel("p.article-summary"));
static LIST_IMAGE: Lazy<Selector> = Lazy::new(|| sel("img.article-image"));
static DIV: Lazy<Selector> = Lazy::new(|| sel("div"));
static P: Lazy<Selector> = Lazy::new(|| sel("p"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| sel("a"));
static NOISE: Lazy<Selector> = Lazy::new(|| sel("script, style, nav, aside, header, footer"));

/// Link texts that point to more content rather than being content.
const READ_MORE_MARKERS: &[&str] = &["قراءة", "المزيد", "تابع", "شاهد", "اقرأ"];

fn text_of(el: ElementRef<'_>) -> String {
    clean_html(&el.text().collect::<Vec<_>>().join(" "))
}

fn absolute(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match Url::parse(href) {
        Ok(u) => Some(u.to_string()),
        Err(_) => base.and_then(|b| b.join(href).ok()).map(|u| u.to_string()),
    }
}

/// Generic listing layout: `div.article-item` blocks with title, link,
/// summary and image. Listings carry no dates, so everything is stamped `now`.
pub fn scrape_listing(
    html: &str,
    page_url: &str,
    source_name: &str,
    now: DateTime<Utc>,
) -> Vec<RawCandidate> {
    let doc = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let mut out = Vec::new();

    for item in doc.select(&LIST_ITEM) {
        let title = item.select(&LIST_TITLE).next().map(text_of).unwrap_or_default();
        let link = item
            .select(&LIST_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|h| absolute(base.as_ref(), h));
        let (false, Some(link)) = (title.is_empty(), link) else {
            continue;
        };
        let summary = item.select(&LIST_SUMMARY).next().map(text_of).unwrap_or_default();
        let image_url = item
            .select(&LIST_IMAGE)
            .next()
            .and_then(|i| i.value().attr("src"))
            .and_then(|s| absolute(base.as_ref(), s));

        out.push(RawCandidate {
            title,
            link,
            summary,
            published_at: now,
            source_name: source_name.to_string(),
            image_url,
        });
    }
    out
}

fn is_excluded(el: ElementRef<'_>, excluded: &[ElementRef<'_>]) -> bool {
    excluded.contains(&el)
        || el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| excluded.contains(&a))
}

fn collect_text(el: ElementRef<'_>, excluded: &[ElementRef<'_>], out: &mut Vec<String>) {
    for child in el.children() {
        if let Some(t) = child.value().as_text() {
            let s = t.trim();
            if !s.is_empty() {
                out.push(s.to_string());
            }
        } else if let Some(c) = ElementRef::wrap(child) {
            if !excluded.contains(&c) {
                collect_text(c, excluded, out);
            }
        }
    }
}

/// Pull the article body out of a page.
///
/// Unwanted selectors are dropped first, then the first matching content
/// selector wins; failing that, the first `div` holding at least three
/// paragraphs. Inside the container, chrome elements and "read more" links
/// are skipped. Text nodes come back one per line.
pub fn extract_article_body(html: &str, rules: &ExtractionRules) -> Option<String> {
    let doc = Html::parse_document(html);

    let mut excluded: Vec<ElementRef<'_>> = Vec::new();
    for raw in &rules.unwanted_selectors {
        match Selector::parse(raw) {
            Ok(s) => excluded.extend(doc.select(&s)),
            Err(_) => tracing::debug!(selector = %raw, "skipping invalid unwanted selector"),
        }
    }

    let from_rules = rules.content_selectors.iter().find_map(|raw| {
        let s = Selector::parse(raw.trim()).ok()?;
        doc.select(&s).find(|e| !is_excluded(*e, &excluded))
    });

    let container = from_rules.or_else(|| {
        doc.select(&DIV).find(|div| {
            !is_excluded(*div, &excluded)
                && div.select(&P).filter(|p| !is_excluded(*p, &excluded)).count() >= 3
        })
    })?;

    excluded.extend(container.select(&NOISE));
    excluded.extend(container.select(&ANCHOR).filter(|a| {
        let t = a.text().collect::<String>().to_lowercase();
        READ_MORE_MARKERS.iter().any(|m| t.contains(m))
    }));

    let mut lines = Vec::new();
    collect_text(container, &excluded, &mut lines);
    let text = lines.join("\n");
    (!text.is_empty()).then_some(text)
}

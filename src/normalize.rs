// src/normalize.rs
//! Text clean-up for display: HTML stripping, curated summaries, titles,
//! local dates and hashtags.

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]+>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());
static RE_SYMBOL_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[\d\s\-_.,;:!?()\[\]{}"'/\\]+$"#).unwrap());
static RE_LINKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://|www\.").unwrap());
static RE_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s\x{0600}-\x{06FF}\x{0750}-\x{077F}]").unwrap());
static RE_SENTENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap());
static RE_TITLE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(عاجل|حصري|خاص|مباشر|الآن)\s*[:|\-]\s*").unwrap());
static RE_EMPTY_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\s*\)").unwrap());
static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

const ARABIC_MONTHS: [&str; 12] = [
    "يناير", "فبراير", "مارس", "أبريل", "مايو", "يونيو", "يوليو", "أغسطس", "سبتمبر", "أكتوبر",
    "نوفمبر", "ديسمبر",
];

const HASHTAG_STOP_WORDS: &[&str] = &[
    "من", "إلى", "عن", "على", "في", "مع", "هذا", "هذه", "تلك", "ذلك", "الذي", "التي", "وقد",
    "وقال", "وكان", "كانت", "لكن", "وأن", "وإن", "ثم", "أو", "أم", "إن", "إذا", "حتى", "لو",
    "منذ", "عند", "عندما", "لدى", "كل", "بعض", "غير", "بين", "بينما", "ضد", "خلال", "بعد",
    "قبل", "حول", "حين", "الى", "الي", "فى", "انه", "أنه", "ان", "أن",
];

pub const HOME_HASHTAG: &str = "#أخبار_الجزائر";
const MAX_HASHTAGS: usize = 7;

/// Strip tags, decode entities, collapse all whitespace to single spaces.
pub fn clean_html(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let no_tags = RE_TAGS.replace_all(s, " ");
    let decoded = html_escape::decode_html_entities(&no_tags);
    RE_WS.replace_all(&decoded, " ").trim().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First `max` chars of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Cut to `max` chars, then back to the last space if it sits past `min_keep`
/// chars, appending an ellipsis in that case.
fn cut_at_word(s: &str, max: usize, min_keep: usize) -> String {
    let head = truncate_chars(s, max);
    match head.rfind(' ') {
        Some(byte) if char_len(&head[..byte]) > min_keep => format!("{}...", &head[..byte]),
        _ => head,
    }
}

/// Display body for an article: cleaned, noise-free, and short.
/// Returns an empty string when nothing worth showing remains.
pub fn prepare_article_content(title: &str, content: &str, unwanted_phrases: &[String]) -> String {
    if content.trim().is_empty() {
        return String::new();
    }
    let no_tags = RE_TAGS.replace_all(content, " ");
    let mut text = html_escape::decode_html_entities(&no_tags).to_string();
    for phrase in unwanted_phrases.iter().filter(|p| !p.is_empty()) {
        text = text.replace(phrase.as_str(), "");
    }

    let lines: Vec<String> = text
        .lines()
        .map(|l| RE_HSPACE.replace_all(l.trim(), " ").to_string())
        .filter(|l| !l.is_empty() && !RE_SYMBOL_LINE.is_match(l) && char_len(l) >= 10)
        .collect();
    let cleaned = lines.join("\n");

    if cleaned.is_empty() || !is_content_useful(&cleaned, title) {
        return String::new();
    }
    if char_len(&cleaned) <= 100 {
        return cleaned;
    }
    create_smart_summary(&cleaned)
}

/// Rejects link farms, symbol soup and bodies that merely restate the title.
pub fn is_content_useful(content: &str, title: &str) -> bool {
    let words = content.split_whitespace().count().max(1);
    let links = RE_LINKS.find_iter(content).count();
    if links as f64 / words as f64 > 0.1 {
        return false;
    }

    let specials = RE_SPECIAL.find_iter(content).count();
    if specials as f64 / char_len(content).max(1) as f64 > 0.3 {
        return false;
    }

    let title_lc = title.to_lowercase();
    let content_lc = content.to_lowercase();
    let title_words: std::collections::HashSet<&str> = title_lc.split_whitespace().collect();
    let content_words: std::collections::HashSet<&str> = content_lc.split_whitespace().collect();
    let shared = title_words.intersection(&content_words).count();
    if shared as f64 / title_words.len().max(1) as f64 > 0.8 {
        return false;
    }
    true
}

/// Up to two substantial sentences from the first three, capped near 200 chars.
pub fn create_smart_summary(content: &str) -> String {
    let picked: Vec<&str> = RE_SENTENCE
        .split(content)
        .take(3)
        .map(str::trim)
        .filter(|s| char_len(s) > 20)
        .take(2)
        .collect();

    if picked.is_empty() {
        return cut_at_word(content, 150, 50);
    }

    let mut summary = picked.join(". ");
    if !summary.ends_with('.') {
        summary.push('.');
    }
    if char_len(&summary) > 200 {
        summary = cut_at_word(&summary, 200, 100);
    }
    summary
}

/// Drop breaking-news prefixes and empty parentheses, normalise spaces.
pub fn enhance_title(title: &str) -> String {
    let t = RE_TITLE_PREFIX.replace(title.trim(), "");
    let t = RE_EMPTY_PARENS.replace_all(&t, "");
    RE_WS.replace_all(&t, " ").trim().to_string()
}

/// `D <Arabic month> YYYY - HH:MM` at the given UTC offset.
pub fn format_local_date(ts: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or(Utc.fix());
    let local = ts.with_timezone(&offset);
    let month = ARABIC_MONTHS[local.month0() as usize];
    format!(
        "{} {} {} - {:02}:{:02}",
        local.day(),
        month,
        local.year(),
        local.hour(),
        local.minute()
    )
}

/// Longest distinct words (>3 chars, not stop words).
pub fn extract_hashtag_words(text: &str, max_tags: usize) -> Vec<String> {
    let cleaned = RE_NON_WORD.replace_all(text, " ");
    let mut unique: Vec<String> = Vec::new();
    for w in cleaned.split_whitespace() {
        if char_len(w) > 3 && !HASHTAG_STOP_WORDS.contains(&w) && !unique.iter().any(|u| u == w) {
            unique.push(w.to_string());
        }
    }
    // stable: equal lengths keep first-seen order
    unique.sort_by_key(|w| std::cmp::Reverse(char_len(w)));
    unique.truncate(max_tags);
    unique
}

/// `#word_word` with anything non-alphanumeric squeezed to underscores.
fn to_tag(raw: &str) -> Option<String> {
    let mut tag = String::with_capacity(raw.len() + 1);
    let mut last_us = true;
    for c in raw.chars() {
        if c.is_alphanumeric() {
            tag.push(c);
            last_us = false;
        } else if !last_us {
            tag.push('_');
            last_us = true;
        }
    }
    let tag = tag.trim_end_matches('_');
    (!tag.is_empty()).then(|| format!("#{tag}"))
}

/// Home tag, category, source, then keyword tags; at most seven, no duplicates.
pub fn create_hashtags(title: &str, content: &str, source: &str, category: &str) -> String {
    let mut tags: Vec<String> = vec![HOME_HASHTAG.to_string()];
    let push = |tags: &mut Vec<String>, t: Option<String>| {
        if let Some(t) = t {
            if tags.len() < MAX_HASHTAGS && !tags.contains(&t) {
                tags.push(t);
            }
        }
    };
    push(&mut tags, to_tag(category));
    push(&mut tags, to_tag(source));
    for w in extract_hashtag_words(&format!("{title} {content}"), 3) {
        push(&mut tags, to_tag(&w));
    }
    tags.join(" ")
}

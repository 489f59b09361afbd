// src/trends.rs
//! Keyword extraction and rolling trend tables (topics, word frequency,
//! sentiment tallies), persisted as one JSON document.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

use crate::sentiment::{SentimentAnalyzer, SentimentLabel};
use crate::stats::CountMap;

const TOP_TOPICS_KEPT: usize = 100;
const TOP_WORDS_KEPT: usize = 200;

pub const STOP_WORDS: &[&str] = &[
    "من", "في", "على", "إلى", "عن", "مع", "هذا", "هذه", "ذلك", "تلك", "أن", "لا", "ما", "هل",
    "كيف", "متى", "أين", "لماذا", "كم", "أي", "و", "ف", "ثم", "أو", "أم", "لكن", "بل", "حتى",
    "إذا", "إن", "كان", "كانت", "كانوا", "يكون", "تكون", "سوف", "سـ", "قد", "منذ", "خلال", "بعد",
    "قبل", "عند", "عندما", "بينما", "كما", "بين", "فوق", "تحت", "له", "لها", "لهم", "لهن", "به",
    "بها", "بهم", "بهن", "منه", "منها", "منهم", "منهن", "عنه", "عنها", "عنهم", "عنهن", "إليه",
    "إليها", "إليهم", "إليهن", "هو", "هي", "هم", "هن", "نحن", "أنت", "أنتم", "أنتن", "أنا",
    "أنتما", "هما", "التي", "الذي", "اللذان", "اللتان", "الذين", "اللاتي", "اللواتي", "الأول",
    "الأولى", "الثاني", "الثانية", "الثالث", "الثالثة", "الرابع", "الرابعة", "الخامس",
    "الخامسة", "السادس", "السادسة", "السابع", "السابعة", "الثامن", "الثامنة", "التاسع",
    "التاسعة", "العاشر", "العاشرة",
];

static STOP_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| STOP_WORDS.iter().copied().collect());
static RE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

pub fn is_stop_word(w: &str) -> bool {
    STOP_SET.contains(w)
}

fn candidate_word(w: &str) -> bool {
    w.chars().count() > 2 && !is_stop_word(w)
}

/// Frequency ranking that keeps first-appearance order among equal counts.
fn most_common(items: &[String], n: usize) -> Vec<(String, usize)> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for it in items {
        let c = counts.entry(it.as_str()).or_insert(0);
        if *c == 0 {
            order.push(it.as_str());
        }
        *c += 1;
    }
    let mut ranked: Vec<(usize, &str)> = order.iter().enumerate().map(|(i, w)| (i, *w)).collect();
    ranked.sort_by(|a, b| counts[b.1].cmp(&counts[a.1]).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(n)
        .map(|(_, w)| (w.to_string(), counts[w]))
        .collect()
}

/// Up to 5 repeated bigrams, then the 10 most frequent words not already
/// covered by a chosen bigram.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let cleaned = RE_PUNCT.replace_all(text, " ");
    let cleaned = RE_DIGITS.replace_all(&cleaned, " ");
    let words: Vec<&str> = cleaned.split_whitespace().collect();

    let filtered: Vec<String> = words
        .iter()
        .filter(|w| candidate_word(w))
        .map(|w| w.to_string())
        .collect();

    let bigrams: Vec<String> = words
        .windows(2)
        .filter(|p| candidate_word(p[0]) && candidate_word(p[1]))
        .map(|p| format!("{} {}", p[0], p[1]))
        .collect();

    let mut out: Vec<String> = most_common(&bigrams, 5)
        .into_iter()
        .filter(|(_, c)| *c > 1)
        .map(|(b, _)| b)
        .collect();

    let joined = out.join(" ");
    for (w, _) in most_common(&filtered, 10) {
        if !joined.contains(&w) {
            out.push(w);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentTally {
    pub positive: u64,
    pub negative: u64,
    pub neutral: u64,
}

impl SentimentTally {
    pub fn record(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Negative => self.negative += 1,
            SentimentLabel::Neutral => self.neutral += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.positive + self.negative + self.neutral
    }

    /// (positive, negative, neutral) in percent; zeros when empty.
    pub fn percentages(&self) -> (f64, f64, f64) {
        let t = self.total();
        if t == 0 {
            return (0.0, 0.0, 0.0);
        }
        let pct = |n: u64| n as f64 * 100.0 / t as f64;
        (pct(self.positive), pct(self.negative), pct(self.neutral))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    #[serde(default)]
    pub trending_topics: CountMap,
    #[serde(default, rename = "sentiment_analysis")]
    pub sentiment: SentimentTally,
    #[serde(default)]
    pub word_frequency: CountMap,
    #[serde(default)]
    pub source_sentiment: BTreeMap<String, SentimentTally>,
}

/// What the trend tracker learned from one article.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleInsight {
    pub keywords: Vec<String>,
    pub sentiment: SentimentLabel,
}

pub struct TrendTracker {
    analyzer: SentimentAnalyzer,
    state: Mutex<TrendSnapshot>,
    path: Option<PathBuf>,
}

impl TrendTracker {
    /// In-memory only; `persist` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            analyzer: SentimentAnalyzer::new(),
            state: Mutex::new(TrendSnapshot::default()),
            path: None,
        }
    }

    /// Resume from `path` if it holds a readable snapshot, else start empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "unreadable trend snapshot, starting fresh");
                TrendSnapshot::default()
            }),
            Err(_) => TrendSnapshot::default(),
        };
        Self {
            analyzer: SentimentAnalyzer::new(),
            state: Mutex::new(state),
            path: Some(path),
        }
    }

    pub fn observe(&self, title: &str, summary: &str, source: &str) -> ArticleInsight {
        let title_kw = extract_keywords(title);
        let full_kw = extract_keywords(&format!("{title} {summary}"));

        let mut combined: Vec<String> = Vec::new();
        for k in title_kw.iter() {
            if !combined.contains(k) {
                combined.push(k.clone());
            }
        }
        for k in full_kw {
            if combined.len() >= 10 {
                break;
            }
            if !combined.contains(&k) {
                combined.push(k);
            }
        }

        let label = self.analyzer.article_label(title, summary);

        {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            for k in &combined {
                st.trending_topics.increment(k);
                st.word_frequency.increment(k);
            }
            st.trending_topics.retain_top(TOP_TOPICS_KEPT);
            st.word_frequency.retain_top(TOP_WORDS_KEPT);
            st.sentiment.record(label);
            st.source_sentiment
                .entry(source.to_string())
                .or_default()
                .record(label);
        }

        let mut keywords: Vec<String> = Vec::new();
        for k in title_kw.into_iter().take(3) {
            if !keywords.contains(&k) {
                keywords.push(k);
            }
        }
        for k in combined {
            if keywords.len() >= 5 {
                break;
            }
            if !keywords.contains(&k) {
                keywords.push(k);
            }
        }

        ArticleInsight {
            keywords,
            sentiment: label,
        }
    }

    pub fn snapshot(&self) -> TrendSnapshot {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn top_topics(&self, n: usize) -> Vec<(String, u64)> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .trending_topics
            .top(n)
    }

    /// Write the snapshot atomically (tmp file + rename). Failures are logged.
    pub async fn persist(&self) {
        let Some(path) = &self.path else { return };
        let bytes = match serde_json::to_vec_pretty(&self.snapshot()) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "serialize trend snapshot");
                return;
            }
        };
        if let Err(e) = write_atomic(path, &bytes).await {
            tracing::warn!(path = %path.display(), error = %e, "write trend snapshot");
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await
}

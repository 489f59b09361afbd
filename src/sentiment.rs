use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// word -> +1 (positive list) / -1 (negative list)
static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).expect("valid sentiment lexicon")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

/// Positive/negative word hits in one text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordCounts {
    pub positive: usize,
    pub negative: usize,
}

impl WordCounts {
    /// +1 / -1 / 0 by raw majority.
    pub fn sign(&self) -> f64 {
        match self.positive.cmp(&self.negative) {
            std::cmp::Ordering::Greater => 1.0,
            std::cmp::Ordering::Less => -1.0,
            std::cmp::Ordering::Equal => 0.0,
        }
    }

    /// Display label; positive needs a 20% margin over negative.
    pub fn label(&self) -> SentimentLabel {
        if self.positive as f64 > self.negative as f64 * 1.2 {
            SentimentLabel::Positive
        } else if self.negative > self.positive {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_score(&self, w: &str) -> i32 {
        *LEXICON.get(w).unwrap_or(&0)
    }

    pub fn count_words(&self, text: &str) -> WordCounts {
        let mut counts = WordCounts::default();
        for tok in tokenize(text) {
            match self.word_score(&tok) {
                s if s > 0 => counts.positive += 1,
                s if s < 0 => counts.negative += 1,
                _ => {}
            }
        }
        counts
    }

    /// Stored article score. Title and body are scored independently; the
    /// title decides unless it is neutral.
    pub fn ingest_score(&self, title: &str, body: &str) -> f64 {
        let t = self.count_words(title).sign();
        if t != 0.0 {
            t
        } else {
            self.count_words(body).sign()
        }
    }

    /// Label for one text.
    pub fn label(&self, text: &str) -> SentimentLabel {
        self.count_words(text).label()
    }

    /// Label for an article: title label wins unless neutral.
    pub fn article_label(&self, title: &str, body: &str) -> SentimentLabel {
        match self.label(title) {
            SentimentLabel::Neutral => self.label(&format!("{title} {body}")),
            l => l,
        }
    }
}

/// Alphanumeric tokens, lower-cased. Arabic letters count as alphanumeric.
pub fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

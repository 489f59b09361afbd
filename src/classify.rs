// src/classify.rs
//! Keyword-table classification: article category, display emoji, urgency.

/// Returned when no category keyword matches.
pub const DEFAULT_CATEGORY: &str = "عام";

/// Ordered: the first category with any keyword hit wins.
pub const CATEGORY_TABLE: &[(&str, &[&str])] = &[
    ("سياسة", &["سياسة", "حكومة", "انتخابات", "برلمان", "رئيس", "وزير"]),
    ("اقتصاد", &["اقتصاد", "بورصة", "أسهم", "استثمار", "تجارة", "نفط"]),
    ("رياضة", &["رياضة", "كرة القدم", "الدوري", "كأس", "منتخب", "لاعب"]),
    ("تكنولوجيا", &["تكنولوجيا", "هواتف", "تطبيقات", "إنترنت", "ذكاء اصطناعي"]),
    ("ثقافة", &["ثقافة", "فن", "موسيقى", "سينما", "مسرح", "تراث"]),
];

const EMOJIS: &[(&str, &str)] = &[
    ("سياسة", "🏛️"),
    ("اقتصاد", "💰"),
    ("رياضة", "⚽"),
    ("تكنولوجيا", "📱"),
    ("ثقافة", "🎨"),
];

const DEFAULT_EMOJI: &str = "📰";

/// Headline markers that put an article at the head of the queue.
pub const URGENT_KEYWORDS: &[&str] = &[
    "عاجل",
    "طارئ",
    "انفجار",
    "حادث",
    "وفاة",
    "استقالة",
    "إعلان هام",
    "قرار عاجل",
];

/// Category tags (source overrides and classifier output) that feed the
/// official / economic / sports delivery buckets.
pub const OFFICIAL_TAGS: &[&str] = &["official"];
pub const ECONOMIC_TAGS: &[&str] = &["economic", "اقتصاد"];
pub const SPORTS_TAGS: &[&str] = &["sports", "رياضة"];

/// Case-insensitive substring match of every keyword table entry against
/// `title + " " + text`.
pub fn classify(title: &str, text: &str) -> &'static str {
    let haystack = format!("{title} {text}").to_lowercase();
    CATEGORY_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(DEFAULT_CATEGORY)
}

pub fn emoji_for(category: &str) -> &'static str {
    EMOJIS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, e)| *e)
        .unwrap_or(DEFAULT_EMOJI)
}

pub fn is_urgent(title: &str) -> bool {
    URGENT_KEYWORDS.iter().any(|k| title.contains(k))
}

pub fn tag_in(category: &str, tags: &[&str]) -> bool {
    tags.iter().any(|t| t.eq_ignore_ascii_case(category))
}

/// Human label for a category tag: source overrides are English slugs.
pub fn display_name(category: &str) -> &str {
    match category {
        "urgent" => "عاجل",
        "official" => "رسمي",
        "news" => "أخبار",
        "economic" => "اقتصاد",
        "sports" => "رياضة",
        "technology" => "تكنولوجيا",
        other => other,
    }
}

//! Feed sentiment scoring
//!
//! VADER compound scores boosted with a market-jargon lexicon that the
//! general-purpose dictionary misses. Scores land in [-1, 1]; the scout
//! treats |score| >= 0.3 as a directional signal.

use vader_sentiment::SentimentIntensityAnalyzer;

const BULLISH_KEYWORDS: &[(&str, f64)] = &[
    ("surge", 0.4),
    ("surges", 0.4),
    ("rally", 0.4),
    ("rallies", 0.4),
    ("soar", 0.5),
    ("soars", 0.5),
    ("bullish", 0.5),
    ("all-time high", 0.5),
    ("breakout", 0.3),
    ("beats estimates", 0.5),
    ("upgrade", 0.3),
    ("upgraded", 0.3),
    ("record high", 0.4),
    ("buyback", 0.3),
    ("raises guidance", 0.5),
    ("partnership", 0.2),
];

const BEARISH_KEYWORDS: &[(&str, f64)] = &[
    ("crash", -0.5),
    ("crashes", -0.5),
    ("plunge", -0.5),
    ("plunges", -0.5),
    ("bearish", -0.5),
    ("collapse", -0.5),
    ("lawsuit", -0.4),
    ("misses estimates", -0.5),
    ("downgrade", -0.4),
    ("downgraded", -0.4),
    ("sell-off", -0.4),
    ("selloff", -0.4),
    ("bankruptcy", -0.6),
    ("recall", -0.3),
    ("cuts guidance", -0.5),
    ("investigation", -0.3),
];

pub struct SentimentAnalyzer {
    analyzer: SentimentIntensityAnalyzer<'static>,
}

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self {
            analyzer: SentimentIntensityAnalyzer::new(),
        }
    }

    fn keyword_boost(text_lower: &str) -> f64 {
        let mut boost = 0.0;
        for (keyword, score) in BULLISH_KEYWORDS.iter().chain(BEARISH_KEYWORDS) {
            if text_lower.contains(keyword) {
                boost += score;
            }
        }
        boost
    }

    /// Score text in [-1, 1].
    pub fn analyze(&self, text: &str) -> f64 {
        if text.trim().is_empty() {
            return 0.0;
        }
        let scores = self.analyzer.polarity_scores(text);
        let compound = scores["compound"];
        let boost = Self::keyword_boost(&text.to_lowercase());
        (compound + boost * 0.5).clamp(-1.0, 1.0)
    }
}

impl Default for SentimentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Cashtags (`$AAPL`) plus standalone mentions of watchlist symbols.
pub fn extract_symbols(text: &str, watchlist: &[String]) -> Vec<String> {
    let mut symbols = Vec::new();
    let mut push = |symbol: String| {
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    };

    let bytes: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == '$' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_uppercase() && j - i <= 5 {
                j += 1;
            }
            if j > i + 1 {
                push(bytes[i + 1..j].iter().collect());
                i = j;
                continue;
            }
        }
        i += 1;
    }

    for word in text.split(|c: char| !c.is_ascii_alphanumeric()) {
        if watchlist.iter().any(|s| s == word) {
            push(word.to_string());
        }
    }
    symbols
}

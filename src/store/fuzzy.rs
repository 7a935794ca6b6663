//! Fallback pattern construction for OCR-noisy text.
//!
//! OCR output confuses visually similar Cyrillic characters (and a couple of
//! Latin look-alikes). When semantic search finds nothing, the store retries
//! with an ordered list of regex patterns derived from the query: literal
//! case variants first, then a character-class "fuzzy" variant, then a
//! loosely-anchored core pattern for longer queries. The caller tries the
//! patterns in order and stops at the first one that yields any match; the
//! ordering trades recall for bounded latency.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Character confusions observed in OCR output: each character matches
/// itself and its common misreading.
static CONFUSIONS: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ('з', "[зц]"),
        ('ц', "[цз]"),
        ('и', "[иі]"),
        ('і', "[іи]"),
        ('а', "[ао]"),
        ('о', "[оа]"),
        ('е', "[еє]"),
        ('є', "[єе]"),
        ('н', "[нп]"),
        ('п', "[пн]"),
        // Latin look-alikes
        ('р', "[рp]"),
        ('у', "[уy]"),
    ])
});

/// Queries longer than this also get a core pattern with the first and
/// last character stripped, to survive misread boundary characters.
const CORE_PATTERN_MIN_CHARS: usize = 4;

/// Build the ordered, deduplicated pattern list for a query.
///
/// All patterns are safe to compile: literal variants are regex-escaped and
/// the fuzzy variant escapes each character before class substitution.
pub fn build_patterns(query: &str) -> Vec<String> {
    let query = query.trim();
    if query.is_empty() {
        return vec![];
    }

    let lower = query.to_lowercase();

    let mut patterns = Vec::new();
    push_unique(&mut patterns, regex::escape(query));
    push_unique(&mut patterns, regex::escape(&lower));
    push_unique(&mut patterns, regex::escape(&query.to_uppercase()));
    push_unique(&mut patterns, regex::escape(&title_case(query)));
    push_unique(&mut patterns, fuzzy_pattern(&lower));

    if lower.chars().count() > CORE_PATTERN_MIN_CHARS {
        let chars: Vec<char> = lower.chars().collect();
        let core: String = chars[1..chars.len() - 1].iter().collect();
        push_unique(&mut patterns, format!(".*{}.*", regex::escape(&core)));
    }

    patterns
}

fn push_unique(patterns: &mut Vec<String>, pattern: String) {
    if !patterns.contains(&pattern) {
        patterns.push(pattern);
    }
}

/// Replace every confusable character with its character class.
fn fuzzy_pattern(lower: &str) -> String {
    let mut pattern = String::with_capacity(lower.len() * 2);
    for c in lower.chars() {
        match CONFUSIONS.get(&c) {
            Some(class) => pattern.push_str(class),
            None => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern
}

/// First character uppercased, rest lowercased.
fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

//! Field-level canonicalization helpers shared by the domain rules.
//!
//! Every helper is total: unparsable input becomes `None` (the missing-value
//! marker) instead of an error.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::MAX_RATING;

static LINE_BREAKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\r\n]+").unwrap());

/// Typographic characters and their plain replacements for quote text.
const TYPOGRAPHIC: &[(char, &str)] = &[
    ('\u{201C}', ""),
    ('\u{201D}', ""),
    ('\u{201E}', ""),
    ('\u{00AB}', ""),
    ('\u{00BB}', ""),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{2014}', "-"),
    ('\u{2013}', "-"),
];

const RATING_WORDS: &[(&str, i64)] = &[
    ("zero", 0),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
];

/// Trim and collapse internal whitespace runs to one space.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapsed text, or `None` when nothing is left.
pub fn non_empty(value: &str) -> Option<String> {
    let collapsed = collapse_whitespace(value);
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Replace line breaks with single spaces, then trim.
pub fn collapse_line_breaks(value: &str) -> String {
    LINE_BREAKS.replace_all(value, " ").trim().to_string()
}

/// Parse a decimal, tolerating surrounding currency symbols or codes and
/// thousands separators. `£51.77`, `1,234.50 EUR` and `12,5` all parse.
pub fn parse_number(value: &str) -> Option<f64> {
    let core = value
        .trim()
        .trim_matches(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.')));
    if core.is_empty() {
        return None;
    }

    let normalized = match (core.contains(','), core.contains('.')) {
        (true, true) => core.replace(',', ""),
        (true, false) => {
            let decimal_comma = core.matches(',').count() == 1
                && core.rsplit(',').next().map(|tail| tail.len() <= 2) == Some(true);
            if decimal_comma {
                core.replace(',', ".")
            } else {
                core.replace(',', "")
            }
        }
        _ => core.to_string(),
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an integral value; fractional input is rejected.
pub fn parse_integer(value: &str) -> Option<i64> {
    let number = parse_number(value)?;
    (number.fract() == 0.0 && number.abs() < i64::MAX as f64).then_some(number as i64)
}

/// Rating in `0..=5`, from digits or an English word (`Three`, `star-rating Four`).
pub fn parse_rating(value: &str) -> Option<i64> {
    let lower = value.trim().to_lowercase();
    let word = lower.rsplit(|c: char| c.is_whitespace()).next().unwrap_or("");
    RATING_WORDS
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, rating)| *rating)
        .or_else(|| parse_integer(&lower))
        .filter(|r| (0..=MAX_RATING).contains(r))
}

/// Strip typographic quotes, normalize apostrophes and dashes, collapse whitespace.
pub fn clean_quote_text(value: &str) -> String {
    let mut plain = String::with_capacity(value.len());
    for c in value.chars() {
        match TYPOGRAPHIC.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => plain.push_str(to),
            None => plain.push(c),
        }
    }
    collapse_whitespace(&plain)
}

/// Lowercase a tag list and tighten ` ,` separators.
pub fn normalize_tags(value: &str) -> String {
    value.to_lowercase().replace(" ,", ",").trim().to_string()
}

/// Pseudonymous contact identifier: first 12 hex chars of SHA-256 over the
/// trimmed, lowercased email.
pub fn pseudonymize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    let digest = Sha256::digest(normalized.as_bytes());
    Some(hex::encode(digest)[..12].to_string())
}

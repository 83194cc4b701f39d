//! Latest-object selection.
//!
//! Keys are opaque sortable strings. "Latest" is the lexicographic maximum
//! of the zero-padded timestamp suffix, which only holds while producers
//! zero-pad and monotonically increase their timestamps.

use crate::models::Domain;

use super::backend::ObjectInfo;

/// Stem marker carried by cleaned snapshots.
pub const CLEANED_MARKER: &str = "_cleaned";

/// Extensions the transform stage can parse.
pub const RAW_EXTENSIONS: &[&str] = &["csv", "json"];

/// Split the last path segment of a key into (stem, extension).
pub fn split_name(key: &str) -> (&str, &str) {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (name, ""),
    }
}

/// Width of a `%Y%m%d_%H%M%S` stamp.
const STAMP_LEN: usize = 15;

fn is_stamp(s: &[u8]) -> bool {
    s.len() == STAMP_LEN
        && s[8] == b'_'
        && s[..8].iter().chain(&s[9..]).all(u8::is_ascii_digit)
}

/// Timestamp at the end of the stem, ignoring `_cleaned`.
///
/// A trailing `%Y%m%d_%H%M%S` stamp is taken at its exact width, so digits
/// in the producer prefix never leak in: `books/books2_20240101_000000.csv`
/// yields `20240101_000000`. Other keys fall back to the trailing `[0-9_]`
/// run without leading underscores; a key with no digits yields "".
pub fn timestamp_suffix(key: &str) -> &str {
    let (stem, _) = split_name(key);
    let base = stem.strip_suffix(CLEANED_MARKER).unwrap_or(stem);
    if let Some(start) = base.len().checked_sub(STAMP_LEN) {
        if base.is_char_boundary(start) && is_stamp(&base.as_bytes()[start..]) {
            return &base[start..];
        }
    }
    let start = base
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '_')
        .last()
        .map(|(i, _)| i)
        .unwrap_or(base.len());
    base[start..].trim_start_matches('_')
}

/// Whether the key names a cleaned snapshot.
pub fn is_cleaned_key(key: &str) -> bool {
    split_name(key).0.ends_with(CLEANED_MARKER)
}

/// Pick the object with the greatest timestamp suffix; the key breaks ties.
pub fn select_latest<'a, F>(objects: &'a [ObjectInfo], filter: F) -> Option<&'a ObjectInfo>
where
    F: Fn(&ObjectInfo) -> bool,
{
    objects
        .iter()
        .filter(|o| filter(o))
        .max_by(|a, b| {
            timestamp_suffix(&a.key)
                .cmp(timestamp_suffix(&b.key))
                .then_with(|| a.key.cmp(&b.key))
        })
}

/// Latest raw object of a domain that the transform stage can read.
pub fn latest_raw(objects: &[ObjectInfo], domain: Domain) -> Option<&ObjectInfo> {
    let prefix = domain.zone_prefix();
    select_latest(objects, |o| {
        let (_, ext) = split_name(&o.key);
        o.key.starts_with(&prefix)
            && !is_cleaned_key(&o.key)
            && RAW_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    })
}

/// Latest cleaned snapshot of a domain.
pub fn latest_cleaned(objects: &[ObjectInfo], domain: Domain) -> Option<&ObjectInfo> {
    let prefix = domain.zone_prefix();
    select_latest(objects, |o| o.key.starts_with(&prefix) && is_cleaned_key(&o.key))
}

/// Cleaned-zone key for a raw key: `<folder>/<stem>_cleaned.csv`.
pub fn cleaned_key_for(domain: Domain, raw_key: &str) -> String {
    let (stem, _) = split_name(raw_key);
    format!("{}{}{}.csv", domain.zone_prefix(), stem, CLEANED_MARKER)
}

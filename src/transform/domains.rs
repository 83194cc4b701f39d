//! Per-domain cleaning rules.
//!
//! Each rule turns one raw row into a typed record, or rejects it when the
//! fields that make up the natural key are missing.

use std::collections::HashMap;

use crate::models::{
    derive_sku, Availability, BookRecord, CleanRecord, CommerceRecord, Domain, PartnerRecord,
    QuoteRecord, CLEANED_AT_COLUMN, UNKNOWN_CATEGORY,
};
use crate::table::Table;

use super::canonical::{
    clean_quote_text, collapse_line_breaks, collapse_whitespace, non_empty, normalize_tags,
    parse_integer, parse_number, parse_rating, pseudonymize_email,
};

/// Author recorded when a quote has none.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// View of one raw row addressed by column name.
struct Row<'a> {
    columns: &'a HashMap<&'a str, usize>,
    cells: &'a [String],
}

impl<'a> Row<'a> {
    /// First non-blank value among the candidate column names.
    fn get(&self, names: &[&str]) -> &'a str {
        names
            .iter()
            .filter_map(|name| self.columns.get(name))
            .filter_map(|&i| self.cells.get(i))
            .map(String::as_str)
            .find(|v| !v.trim().is_empty())
            .unwrap_or("")
    }
}

fn book(row: &Row) -> Option<CleanRecord> {
    let title = non_empty(row.get(&["title"]))?;
    Some(CleanRecord::Book(BookRecord {
        id: non_empty(row.get(&["id", "upc"])),
        title,
        price_gbp: parse_number(row.get(&["price_gbp", "price"])),
        rating: parse_rating(row.get(&["rating"])),
        availability: Availability::from_text(row.get(&["availability"])),
    }))
}

fn quote(row: &Row) -> Option<CleanRecord> {
    let text = clean_quote_text(row.get(&["text", "quote"]));
    if text.is_empty() {
        return None;
    }
    let author = non_empty(row.get(&["author"])).unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
    Some(CleanRecord::Quote(QuoteRecord {
        text,
        author,
        tags: normalize_tags(row.get(&["tags"])),
    }))
}

fn commerce(row: &Row) -> Option<CleanRecord> {
    let title = non_empty(row.get(&["title", "name"]))?;
    let category =
        non_empty(row.get(&["category"])).unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
    let sku = non_empty(row.get(&["sku"])).unwrap_or_else(|| derive_sku(&title, &category));
    let description = collapse_line_breaks(row.get(&["description"]));

    Some(CleanRecord::Commerce(CommerceRecord {
        sku,
        title,
        category,
        subcategory: non_empty(row.get(&["subcategory"])),
        description: (!description.is_empty()).then_some(description),
        price: parse_number(row.get(&["price"])),
        rating: parse_rating(row.get(&["rating"])),
        reviews_count: parse_integer(row.get(&["reviews_count", "reviews"])),
        product_url: non_empty(row.get(&["product_url", "url"])),
    }))
}

/// Contact PII never crosses into the cleaned zone; only the pseudonymous
/// `contact_id` survives.
fn partner(row: &Row) -> Option<CleanRecord> {
    let adresse = non_empty(row.get(&["adresse"]))?;
    let code_postal = non_empty(row.get(&["code_postal"]))?;
    let ville = non_empty(row.get(&["ville"]))?;
    let contact_id = pseudonymize_email(row.get(&["contact_email"]))
        .or_else(|| non_empty(row.get(&["contact_id"])));

    Some(CleanRecord::Partner(PartnerRecord {
        nom: non_empty(row.get(&["nom", "nom_librairie"])),
        adresse,
        code_postal: collapse_whitespace(&code_postal),
        ville,
        contact_id,
        lat: parse_number(row.get(&["lat", "latitude"])),
        lon: parse_number(row.get(&["lon", "longitude"])),
    }))
}

/// Canonicalize one raw row, or `None` when it must be skipped.
fn canonicalize(domain: Domain, row: &Row) -> Option<CleanRecord> {
    match domain {
        Domain::Books => book(row),
        Domain::Quotes => quote(row),
        Domain::Commerce => commerce(row),
        Domain::Partners => partner(row),
    }
}

/// Result of cleaning one raw table.
#[derive(Debug, Clone)]
pub struct CleanBatch {
    pub table: Table,
    pub rows_read: u64,
    pub duplicates_dropped: u64,
    pub rows_skipped: u64,
}

/// Apply a domain's rules to a raw table: canonicalize, drop rows missing
/// their key, keep the last row per natural key and stamp `cleaned_at`.
///
/// Survivors keep the position of their last occurrence.
pub fn clean_table(domain: Domain, raw: &Table, cleaned_at: &str) -> CleanBatch {
    let columns: HashMap<&str, usize> = raw
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let mut records = Vec::with_capacity(raw.rows.len());
    let mut skipped = 0;
    for cells in &raw.rows {
        let row = Row {
            columns: &columns,
            cells,
        };
        match canonicalize(domain, &row) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    let mut last_seen: HashMap<Vec<String>, usize> = HashMap::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        last_seen.insert(record.natural_key(), i);
    }

    let valid = records.len();
    let mut header: Vec<String> = CleanRecord::columns(domain)
        .iter()
        .map(|c| c.to_string())
        .collect();
    header.push(CLEANED_AT_COLUMN.to_string());

    let mut table = Table::new(header);
    for (i, record) in records.into_iter().enumerate() {
        if last_seen.get(&record.natural_key()) != Some(&i) {
            continue;
        }
        let mut cells = record.into_cells();
        cells.push(cleaned_at.to_string());
        table.rows.push(cells);
    }

    CleanBatch {
        rows_read: raw.rows.len() as u64,
        duplicates_dropped: (valid - table.rows.len()) as u64,
        rows_skipped: skipped,
        table,
    }
}

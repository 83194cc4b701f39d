//! Per-domain canonical record schemas.
//!
//! These are the typed shapes rows take once they cross the transform
//! boundary. Each record knows its output column order and how to render
//! itself back into cells, with an empty cell as the missing-value marker.

use serde::{Deserialize, Serialize};

use super::Domain;

/// Stock status normalized from free-text availability strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "In Stock",
            Self::OutOfStock => "Out of Stock",
            Self::Unknown => "Unknown",
        }
    }

    /// Map strings such as `In stock (19 available)` onto the enumeration.
    pub fn from_text(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        if lower.is_empty() || lower == "unknown" {
            Self::Unknown
        } else if lower.contains("out of stock")
            || lower.contains("unavailable")
            || lower.contains("sold out")
        {
            Self::OutOfStock
        } else if lower.contains("stock") || lower.contains("available") {
            Self::InStock
        } else {
            Self::OutOfStock
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: Option<String>,
    pub title: String,
    pub price_gbp: Option<f64>,
    pub rating: Option<i64>,
    pub availability: Availability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub text: String,
    pub author: String,
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommerceRecord {
    pub sku: String,
    pub title: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub rating: Option<i64>,
    pub reviews_count: Option<i64>,
    pub product_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerRecord {
    pub nom: Option<String>,
    pub adresse: String,
    pub code_postal: String,
    pub ville: String,
    pub contact_id: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// A canonical row of any domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum CleanRecord {
    Book(BookRecord),
    Quote(QuoteRecord),
    Commerce(CommerceRecord),
    Partner(PartnerRecord),
}

/// Column stamped on every cleaned snapshot.
pub const CLEANED_AT_COLUMN: &str = "cleaned_at";

impl CleanRecord {
    pub fn domain(&self) -> Domain {
        match self {
            Self::Book(_) => Domain::Books,
            Self::Quote(_) => Domain::Quotes,
            Self::Commerce(_) => Domain::Commerce,
            Self::Partner(_) => Domain::Partners,
        }
    }

    /// Output columns for a domain, `cleaned_at` excluded.
    pub fn columns(domain: Domain) -> &'static [&'static str] {
        match domain {
            Domain::Books => &["id", "title", "price_gbp", "rating", "availability"],
            Domain::Quotes => &["text", "author", "tags"],
            Domain::Commerce => &[
                "sku",
                "title",
                "category",
                "subcategory",
                "description",
                "price",
                "rating",
                "reviews_count",
                "product_url",
            ],
            Domain::Partners => &[
                "nom",
                "adresse",
                "code_postal",
                "ville",
                "contact_id",
                "lat",
                "lon",
            ],
        }
    }

    /// Natural-key value used for batch-local deduplication.
    pub fn natural_key(&self) -> Vec<String> {
        match self {
            Self::Book(r) => vec![r.title.clone()],
            Self::Quote(r) => vec![r.text.clone(), r.author.clone()],
            Self::Commerce(r) => vec![r.sku.clone()],
            Self::Partner(r) => vec![r.adresse.clone(), r.code_postal.clone(), r.ville.clone()],
        }
    }

    /// Render cells in `columns()` order.
    pub fn into_cells(self) -> Vec<String> {
        match self {
            Self::Book(r) => vec![
                text_cell(r.id),
                r.title,
                number_cell(r.price_gbp),
                int_cell(r.rating),
                r.availability.as_str().to_string(),
            ],
            Self::Quote(r) => vec![r.text, r.author, r.tags],
            Self::Commerce(r) => vec![
                r.sku,
                r.title,
                r.category,
                text_cell(r.subcategory),
                text_cell(r.description),
                number_cell(r.price),
                int_cell(r.rating),
                int_cell(r.reviews_count),
                text_cell(r.product_url),
            ],
            Self::Partner(r) => vec![
                text_cell(r.nom),
                r.adresse,
                r.code_postal,
                r.ville,
                text_cell(r.contact_id),
                number_cell(r.lat),
                number_cell(r.lon),
            ],
        }
    }
}

fn text_cell(value: Option<String>) -> String {
    value.unwrap_or_default()
}

fn int_cell(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Floats always carry a fractional part so column typing stays `REAL`.
pub fn number_cell(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() && v.fract() == 0.0 => format!("{:.1}", v),
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

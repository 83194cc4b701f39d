//! Catalog product models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Highest rating a product can carry.
pub const MAX_RATING: i64 = 5;

/// Category assigned when a product arrives without one.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Stable SKU for an identity key: first 12 hex chars (uppercase) of
/// SHA-256 over `title`, a unit separator, and `category`.
pub fn derive_sku(title: &str, category: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(category.as_bytes());
    hex::encode(hasher.finalize())[..12].to_ascii_uppercase()
}

/// A product as submitted by ingestion, before it is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub rating: Option<i64>,
}

impl NewProduct {
    pub fn new(title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_rating(mut self, rating: i64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Trimmed title, or `None` when the identity key cannot be formed.
    pub fn identity_title(&self) -> Option<&str> {
        let title = self.title.trim();
        (!title.is_empty()).then_some(title)
    }

    /// Trimmed category, falling back to `unknown`.
    pub fn identity_category(&self) -> &str {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNKNOWN_CATEGORY)
    }

    /// Price with non-finite values coerced to missing.
    pub fn normalized_price(&self) -> Option<f64> {
        self.price.filter(|p| p.is_finite())
    }

    /// Rating with out-of-range values coerced to missing.
    pub fn normalized_rating(&self) -> Option<i64> {
        self.rating.filter(|r| (0..=MAX_RATING).contains(r))
    }

    pub fn sku(&self) -> Option<String> {
        self.identity_title()
            .map(|title| derive_sku(title, self.identity_category()))
    }
}

/// A stored catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub title: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub rating: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable point of a product's price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub sku: String,
    pub price: f64,
    pub recorded_at: DateTime<Utc>,
}

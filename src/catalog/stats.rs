//! Catalog aggregations.
//!
//! Missing prices and ratings are excluded from every aggregate rather than
//! counted as zero. Averages are rounded to two decimals.

use rusqlite::params;
use serde::Serialize;

use super::products::{product_from_row, PRODUCT_COLUMNS};
use super::{round2, CatalogError, CatalogStore, Result};
use crate::models::Product;

/// Default bucket boundaries for `price_distribution`.
pub const DEFAULT_PRICE_BUCKETS: &[f64] = &[0.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalStats {
    pub total_products: u64,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_rating: Option<f64>,
    pub categories: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub category: String,
    /// Set only for (category, subcategory) groupings.
    pub subcategory: Option<String>,
    pub count: u64,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_rating: Option<f64>,
}

/// One bucket of a price distribution: `[lower, upper)`. The overflow bucket
/// has no upper bound; the underflow bucket has no lower bound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBucket {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub count: u64,
    pub avg_rating: Option<f64>,
}

impl PriceBucket {
    pub fn label(&self) -> String {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => format!("[{}, {})", lo, hi),
            (Some(lo), None) => format!(">= {}", lo),
            (None, Some(hi)) => format!("< {}", hi),
            (None, None) => "all".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueScore {
    pub product: Product,
    /// rating / (price / 100)
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceGroup {
    pub price: f64,
    pub count: u64,
    pub titles: Vec<String>,
}

fn avg(sum: f64, n: u64) -> Option<f64> {
    (n > 0).then(|| round2(sum / n as f64))
}

fn group_stats_from_row(row: &rusqlite::Row<'_>, with_subcategory: bool) -> rusqlite::Result<GroupStats> {
    Ok(GroupStats {
        category: row.get("category")?,
        subcategory: if with_subcategory {
            row.get("subcategory")?
        } else {
            None
        },
        count: row.get::<_, i64>("n")? as u64,
        avg_price: row.get::<_, Option<f64>>("avg_price")?.map(round2),
        min_price: row.get("min_price")?,
        max_price: row.get("max_price")?,
        avg_rating: row.get::<_, Option<f64>>("avg_rating")?.map(round2),
    })
}

impl CatalogStore {
    pub fn global_stats(&self) -> Result<GlobalStats> {
        let conn = self.connect()?;
        let stats = conn.query_row(
            r#"
            SELECT COUNT(*), AVG(price), MIN(price), MAX(price), AVG(rating),
                   COUNT(DISTINCT category)
            FROM products
            "#,
            [],
            |row| {
                Ok(GlobalStats {
                    total_products: row.get::<_, i64>(0)? as u64,
                    avg_price: row.get::<_, Option<f64>>(1)?.map(round2),
                    min_price: row.get(2)?,
                    max_price: row.get(3)?,
                    avg_rating: row.get::<_, Option<f64>>(4)?.map(round2),
                    categories: row.get::<_, i64>(5)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    /// Aggregates per category, largest first.
    pub fn stats_by_category(&self) -> Result<Vec<GroupStats>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT category, COUNT(*) AS n, AVG(price) AS avg_price, MIN(price) AS min_price,
                   MAX(price) AS max_price, AVG(rating) AS avg_rating
            FROM products
            GROUP BY category
            ORDER BY n DESC, category ASC
            "#,
        )?;
        let stats = stmt
            .query_map([], |row| group_stats_from_row(row, false))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stats)
    }

    /// Aggregates per (category, subcategory), largest first, optionally
    /// within one category.
    pub fn stats_by_group(&self, category: Option<&str>) -> Result<Vec<GroupStats>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT category, subcategory, COUNT(*) AS n, AVG(price) AS avg_price,
                   MIN(price) AS min_price, MAX(price) AS max_price, AVG(rating) AS avg_rating
            FROM products
            WHERE ?1 IS NULL OR category = ?1
            GROUP BY category, subcategory
            ORDER BY n DESC, category ASC, subcategory ASC
            "#,
        )?;
        let stats = stmt
            .query_map(params![category], |row| group_stats_from_row(row, true))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stats)
    }

    /// Partition priced products into `[b[i], b[i+1])` buckets plus an
    /// overflow bucket for prices at or above the last boundary. Prices below
    /// the first boundary get a leading underflow bucket, emitted only when
    /// non-empty, so bucket counts always sum to the number of priced products.
    pub fn price_distribution(&self, boundaries: &[f64]) -> Result<Vec<PriceBucket>> {
        if boundaries.is_empty() {
            return Err(CatalogError::Validation(
                "at least one bucket boundary is required".to_string(),
            ));
        }
        if boundaries.iter().any(|b| !b.is_finite())
            || boundaries.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(CatalogError::Validation(
                "bucket boundaries must be finite and strictly increasing".to_string(),
            ));
        }

        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT price, rating FROM products WHERE price IS NOT NULL")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, f64>(0)?, row.get::<_, Option<i64>>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Slot 0 is underflow, slot i+1 starts at boundaries[i].
        let slots = boundaries.len() + 1;
        let mut counts = vec![0u64; slots];
        let mut rating_sums = vec![(0.0f64, 0u64); slots];
        for (price, rating) in rows {
            let slot = boundaries.partition_point(|b| *b <= price);
            counts[slot] += 1;
            if let Some(r) = rating {
                rating_sums[slot].0 += r as f64;
                rating_sums[slot].1 += 1;
            }
        }

        let mut buckets = Vec::with_capacity(slots);
        for slot in 0..slots {
            if slot == 0 && counts[0] == 0 {
                continue;
            }
            let lower = slot.checked_sub(1).map(|i| boundaries[i]);
            let upper = boundaries.get(slot).copied();
            buckets.push(PriceBucket {
                lower,
                upper,
                count: counts[slot],
                avg_rating: avg(rating_sums[slot].0, rating_sums[slot].1),
            });
        }
        Ok(buckets)
    }

    /// The most expensive product of every category with at least one price.
    /// Ties go to the earliest stored product. Ordered by price, highest first.
    pub fn most_expensive_per_category(&self) -> Result<Vec<Product>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM products
            WHERE price IS NOT NULL
            ORDER BY category ASC, price DESC, id ASC
            "#,
            PRODUCT_COLUMNS
        ))?;
        let products = stmt
            .query_map([], product_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut top: Vec<Product> = Vec::new();
        for product in products {
            if top.last().map(|p| p.category != product.category).unwrap_or(true) {
                top.push(product);
            }
        }
        top.sort_by(|a, b| {
            b.price
                .partial_cmp(&a.price)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.category.cmp(&b.category))
        });
        Ok(top)
    }

    /// Best rating per unit of price. Products with price <= 0 or
    /// rating <= 0 never qualify.
    pub fn value_ranking(&self, limit: usize) -> Result<Vec<ValueScore>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM products
            WHERE price > 0 AND rating > 0
            ORDER BY id ASC
            "#,
            PRODUCT_COLUMNS
        ))?;
        let products = stmt
            .query_map([], product_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut scored: Vec<ValueScore> = products
            .into_iter()
            .filter_map(|product| match (product.price, product.rating) {
                (Some(price), Some(rating)) if price > 0.0 && rating > 0 => {
                    let score = rating as f64 / (price / 100.0);
                    Some(ValueScore { product, score })
                }
                _ => None,
            })
            .collect();
        // Stable sort keeps id order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Prices shared by more than one product, most shared first.
    pub fn duplicate_prices(&self) -> Result<Vec<PriceGroup>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT price, COUNT(*) AS n FROM products
            WHERE price IS NOT NULL
            GROUP BY price
            HAVING n > 1
            ORDER BY n DESC, price ASC
            "#,
        )?;
        let groups = stmt
            .query_map([], |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut titles_stmt =
            conn.prepare("SELECT title FROM products WHERE price = ?1 ORDER BY id ASC")?;
        let mut result = Vec::with_capacity(groups.len());
        for (price, count) in groups {
            let titles = titles_stmt
                .query_map(params![price], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            result.push(PriceGroup {
                price,
                count,
                titles,
            });
        }
        Ok(result)
    }
}

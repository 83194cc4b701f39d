//! Append-only price history.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use super::{
    format_timestamp, parse_timestamp, retry_contended, CatalogError, CatalogStore, Result,
};
use crate::models::PricePoint;

impl CatalogStore {
    /// Append a price point stamped now.
    ///
    /// Not idempotent: callers that retry must dedupe by timestamp.
    pub fn record_price(&self, sku: &str, price: f64) -> Result<PricePoint> {
        self.record_price_at(sku, price, Utc::now())
    }

    /// Append a price point with an explicit timestamp.
    pub fn record_price_at(&self, sku: &str, price: f64, at: DateTime<Utc>) -> Result<PricePoint> {
        let sku = sku.trim();
        if sku.is_empty() {
            return Err(CatalogError::Validation("sku is required".to_string()));
        }
        if !price.is_finite() {
            return Err(CatalogError::Validation(format!(
                "price for {} is not a number",
                sku
            )));
        }

        let recorded_at = format_timestamp(at);
        retry_contended(&format!("price point for {}", sku), || {
            let conn = self.connect()?;
            conn.execute(
                "INSERT INTO price_history (sku, price, recorded_at) VALUES (?1, ?2, ?3)",
                params![sku, price, recorded_at],
            )?;
            Ok(())
        })?;

        Ok(PricePoint {
            sku: sku.to_string(),
            price,
            recorded_at: parse_timestamp(&recorded_at),
        })
    }

    /// Price points for `sku`, oldest first. With `window_days`, only points
    /// recorded within that many days before now.
    pub fn price_history(&self, sku: &str, window_days: Option<u32>) -> Result<Vec<PricePoint>> {
        let since = window_days
            .map(|days| format_timestamp(Utc::now() - Duration::days(i64::from(days))))
            .unwrap_or_default();

        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT sku, price, recorded_at FROM price_history
            WHERE sku = ?1 AND recorded_at >= ?2
            ORDER BY recorded_at ASC, id ASC
            "#,
        )?;
        let points = stmt
            .query_map(params![sku.trim(), since], |row| {
                Ok(PricePoint {
                    sku: row.get(0)?,
                    price: row.get(1)?,
                    recorded_at: parse_timestamp(&row.get::<_, String>(2)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(points)
    }
}

//! Product upsert and lookup operations.

use chrono::Utc;
use rusqlite::{params, Row, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    format_timestamp, parse_timestamp, retry_contended, CatalogError, CatalogStore, OptionalExt,
    Result,
};
use crate::models::{NewProduct, Product};

pub(crate) const PRODUCT_COLUMNS: &str =
    "id, sku, title, category, subcategory, description, price, rating, created_at, updated_at";

/// Whether an upsert created or refreshed the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Totals from `bulk_upsert`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkUpsertSummary {
    pub inserted: u64,
    pub updated: u64,
    pub rejected: u64,
}

pub(crate) fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get("id")?,
        sku: row.get("sku")?,
        title: row.get("title")?,
        category: row.get("category")?,
        subcategory: row.get("subcategory")?,
        description: row.get("description")?,
        price: row.get("price")?,
        rating: row.get("rating")?,
        created_at: parse_timestamp(&row.get::<_, String>("created_at")?),
        updated_at: parse_timestamp(&row.get::<_, String>("updated_at")?),
    })
}

/// Blank optional text is stored as missing.
fn optional_text(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl CatalogStore {
    /// Insert or update the product identified by (title, category).
    ///
    /// One `INSERT .. ON CONFLICT DO UPDATE` statement performs the match and
    /// the write, so racing callers converge on a single row. `created_at` is
    /// set once; `updated_at` moves on every write. The latest write wins for
    /// every optional field, so a missing or invalid value clears what was
    /// stored.
    ///
    /// Lock contention is retried with capped backoff until the write lands.
    pub fn upsert(&self, product: &NewProduct) -> Result<UpsertOutcome> {
        let title = product
            .identity_title()
            .ok_or_else(|| CatalogError::Validation("product title is required".to_string()))?;
        let category = product.identity_category();

        retry_contended(&format!("upsert of '{}'", title), || {
            self.try_upsert(product, title, category)
        })
    }

    fn try_upsert(&self, product: &NewProduct, title: &str, category: &str) -> Result<UpsertOutcome> {
        let mut conn = self.connect()?;
        let now = format_timestamp(Utc::now());
        let sku = crate::models::derive_sku(title, category);

        // The write lock is held from the existence check through the write.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existed = tx
            .query_row(
                "SELECT 1 FROM products WHERE title = ?1 AND category = ?2",
                params![title, category],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        tx.execute(
            r#"
            INSERT INTO products
                (sku, title, category, subcategory, description, price, rating, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(title, category) DO UPDATE SET
                subcategory = excluded.subcategory,
                description = excluded.description,
                price = excluded.price,
                rating = excluded.rating,
                updated_at = excluded.updated_at
            "#,
            params![
                sku,
                title,
                category,
                optional_text(&product.subcategory),
                optional_text(&product.description),
                product.normalized_price(),
                product.normalized_rating(),
                now,
            ],
        )?;
        tx.commit()?;

        let outcome = if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        debug!("Upserted '{}' in '{}': {:?}", title, category, outcome);
        Ok(outcome)
    }

    /// Upsert many products; invalid ones are counted, not fatal.
    pub fn bulk_upsert(&self, products: &[NewProduct]) -> Result<BulkUpsertSummary> {
        let mut summary = BulkUpsertSummary::default();
        for product in products {
            match self.upsert(product) {
                Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
                Ok(UpsertOutcome::Updated) => summary.updated += 1,
                Err(CatalogError::Validation(reason)) => {
                    debug!("Rejected product: {}", reason);
                    summary.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    /// Fetch a product by identity key.
    pub fn get(&self, title: &str, category: &str) -> Result<Option<Product>> {
        let conn = self.connect()?;
        let product = conn
            .query_row(
                &format!(
                    "SELECT {} FROM products WHERE title = ?1 AND category = ?2",
                    PRODUCT_COLUMNS
                ),
                params![title.trim(), category.trim()],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    pub fn get_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        let conn = self.connect()?;
        let product = conn
            .query_row(
                &format!("SELECT {} FROM products WHERE sku = ?1", PRODUCT_COLUMNS),
                params![sku.trim().to_ascii_uppercase()],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    /// Every product in insertion order.
    pub fn all_products(&self) -> Result<Vec<Product>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM products ORDER BY id ASC",
            PRODUCT_COLUMNS
        ))?;
        let products = stmt
            .query_map([], product_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(products)
    }

    /// Distinct categories, sorted.
    pub fn categories(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT DISTINCT category FROM products ORDER BY category")?;
        let categories = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(categories)
    }

    /// Distinct subcategories, optionally within one category.
    pub fn subcategories(&self, category: Option<&str>) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT subcategory FROM products
            WHERE subcategory IS NOT NULL AND (?1 IS NULL OR category = ?1)
            ORDER BY subcategory
            "#,
        )?;
        let subcategories = stmt
            .query_map(params![category], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(subcategories)
    }

    /// Remove every product. Price history and the run log are kept.
    pub fn delete_all(&self) -> Result<u64> {
        let conn = self.connect()?;
        let deleted = conn.execute("DELETE FROM products", [])?;
        warn!("Deleted {} products from the catalog", deleted);
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classify, ErrorKind};
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, CatalogStore) {
        let dir = tempdir().unwrap();
        let store = CatalogStore::open(&dir.path().join("catalog.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_upsert_converges_on_identity_key() {
        let (_dir, store) = store();
        let first = store
            .upsert(&NewProduct::new("A", "x").with_price(10.0))
            .unwrap();
        let original = store.get("A", "x").unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store
            .upsert(&NewProduct::new("A", "x").with_price(12.0))
            .unwrap();
        let updated = store.get("A", "x").unwrap().unwrap();

        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(store.count(&[]).unwrap(), 1);
        assert_eq!(updated.price, Some(12.0));
        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at > original.updated_at);
        assert_eq!(updated.id, original.id);
    }

    #[test]
    fn test_missing_title_is_rejected_before_write() {
        let (_dir, store) = store();
        let err = store.upsert(&NewProduct::new("   ", "x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.count(&[]).unwrap(), 0);
    }

    #[test]
    fn test_missing_category_is_unknown() {
        let (_dir, store) = store();
        let product = NewProduct {
            title: "Lamp".to_string(),
            ..Default::default()
        };
        store.upsert(&product).unwrap();
        assert!(store.get("Lamp", "unknown").unwrap().is_some());
    }

    #[test]
    fn test_invalid_values_are_stored_as_missing() {
        let (_dir, store) = store();
        store
            .upsert(&NewProduct::new("B", "x").with_price(f64::NAN).with_rating(11))
            .unwrap();
        let product = store.get("B", "x").unwrap().unwrap();
        assert_eq!(product.price, None);
        assert_eq!(product.rating, None);
    }

    #[test]
    fn test_latest_write_replaces_optional_fields() {
        let (_dir, store) = store();
        store
            .upsert(
                &NewProduct::new("C", "x")
                    .with_price(5.0)
                    .with_description("Blue"),
            )
            .unwrap();
        store.upsert(&NewProduct::new("C", "x").with_rating(4)).unwrap();
        let product = store.get("C", "x").unwrap().unwrap();
        assert_eq!(product.price, None);
        assert_eq!(product.description, None);
        assert_eq!(product.rating, Some(4));
    }

    #[test]
    fn test_invalid_price_clears_previous_price() {
        let (_dir, store) = store();
        store
            .upsert(&NewProduct::new("A", "x").with_price(10.0).with_rating(3))
            .unwrap();
        let outcome = store
            .upsert(&NewProduct::new("A", "x").with_price(f64::NAN).with_rating(9))
            .unwrap();
        let product = store.get("A", "x").unwrap().unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(product.price, None);
        assert_eq!(product.rating, None);
    }

    #[test]
    fn test_outcome_does_not_depend_on_clock() {
        let (_dir, store) = store();
        let first = store.upsert(&NewProduct::new("Same", "x")).unwrap();
        // No pause: both writes may land within one timestamp tick.
        let second = store.upsert(&NewProduct::new("Same", "x")).unwrap();
        let third = store.upsert(&NewProduct::new("Same", "x")).unwrap();
        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(third, UpsertOutcome::Updated);
    }

    #[test]
    fn test_upsert_waits_out_a_held_write_lock() {
        let (dir, store) = store();
        let path = dir.path().join("catalog.db");
        let mut holder = rusqlite::Connection::open(&path).unwrap();
        let tx = holder
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.upsert(&NewProduct::new("Locked", "x")))
        };
        std::thread::sleep(std::time::Duration::from_millis(100));
        tx.commit().unwrap();

        assert_eq!(writer.join().unwrap().unwrap(), UpsertOutcome::Inserted);
        assert!(store.get("Locked", "x").unwrap().is_some());
    }

    #[test]
    fn test_get_by_sku_and_listings() {
        let (_dir, store) = store();
        store
            .upsert(&NewProduct::new("Laptop", "computers").with_subcategory("laptops"))
            .unwrap();
        store
            .upsert(&NewProduct::new("Tablet", "computers").with_subcategory("tablets"))
            .unwrap();
        store.upsert(&NewProduct::new("Phone", "phones")).unwrap();

        let sku = crate::models::derive_sku("Laptop", "computers");
        let product = store.get_by_sku(&sku.to_lowercase()).unwrap().unwrap();
        assert_eq!(product.title, "Laptop");
        assert_eq!(product.sku, sku);

        assert_eq!(store.categories().unwrap(), vec!["computers", "phones"]);
        assert_eq!(
            store.subcategories(Some("computers")).unwrap(),
            vec!["laptops", "tablets"]
        );
        assert!(store.subcategories(Some("phones")).unwrap().is_empty());
        assert_eq!(store.subcategories(None).unwrap().len(), 2);
    }

    #[test]
    fn test_bulk_upsert_counts() {
        let (_dir, store) = store();
        let summary = store
            .bulk_upsert(&[
                NewProduct::new("A", "x"),
                NewProduct::new("A", "x"),
                NewProduct::new("", "x"),
                NewProduct::new("B", "x"),
            ])
            .unwrap();
        assert_eq!(
            summary,
            BulkUpsertSummary {
                inserted: 2,
                updated: 1,
                rejected: 1
            }
        );
    }

    #[test]
    fn test_delete_all() {
        let (_dir, store) = store();
        store.upsert(&NewProduct::new("A", "x")).unwrap();
        assert_eq!(store.delete_all().unwrap(), 1);
        assert_eq!(store.count(&[]).unwrap(), 0);
    }
}

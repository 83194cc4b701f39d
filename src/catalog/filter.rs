//! Product queries: a conjunction of field predicates, sort keys and paging.

use regex::Regex;
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use super::products::{product_from_row, PRODUCT_COLUMNS};
use super::{CatalogError, CatalogStore, Result};
use crate::models::Product;

/// Product fields that can be filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductField {
    Sku,
    Title,
    Category,
    Subcategory,
    Description,
    Price,
    Rating,
}

impl ProductField {
    fn column(&self) -> &'static str {
        match self {
            Self::Sku => "sku",
            Self::Title => "title",
            Self::Category => "category",
            Self::Subcategory => "subcategory",
            Self::Description => "description",
            Self::Price => "price",
            Self::Rating => "rating",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Self::Price | Self::Rating)
    }
}

/// Operand of an equality predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

/// One field predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductFilter {
    Eq(ProductField, FieldValue),
    /// Inclusive on both ends; a missing bound is open.
    Range {
        field: ProductField,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Case-insensitive substring.
    Contains(ProductField, String),
    /// Regular expression (Rust `regex` syntax).
    Matches(ProductField, String),
    IsMissing(ProductField),
    Or(Vec<ProductFilter>),
}

impl ProductFilter {
    /// Append this predicate's SQL and bind values.
    fn to_sql(&self, params: &mut Vec<Box<dyn ToSql>>) -> Result<String> {
        let sql = match self {
            Self::Eq(field, FieldValue::Number(n)) => {
                params.push(Box::new(*n));
                format!("{} = ?", field.column())
            }
            Self::Eq(field, FieldValue::Text(s)) => {
                params.push(Box::new(s.clone()));
                format!("{} = ?", field.column())
            }
            Self::Range { field, min, max } => {
                if !field.is_numeric() {
                    return Err(CatalogError::Validation(format!(
                        "range filter on non-numeric field '{}'",
                        field.column()
                    )));
                }
                let mut parts = vec![format!("{} IS NOT NULL", field.column())];
                if let Some(min) = min {
                    params.push(Box::new(*min));
                    parts.push(format!("{} >= ?", field.column()));
                }
                if let Some(max) = max {
                    params.push(Box::new(*max));
                    parts.push(format!("{} <= ?", field.column()));
                }
                format!("({})", parts.join(" AND "))
            }
            Self::Contains(field, needle) => {
                params.push(Box::new(needle.to_lowercase()));
                format!("instr(lower({}), ?) > 0", field.column())
            }
            Self::Matches(field, pattern) => {
                Regex::new(pattern).map_err(|e| {
                    CatalogError::Validation(format!("invalid pattern '{}': {}", pattern, e))
                })?;
                params.push(Box::new(pattern.clone()));
                format!("{} REGEXP ?", field.column())
            }
            Self::IsMissing(field) => format!("{} IS NULL", field.column()),
            Self::Or(filters) if filters.is_empty() => "0 = 1".to_string(),
            Self::Or(filters) => {
                let parts = filters
                    .iter()
                    .map(|f| f.to_sql(params))
                    .collect::<Result<Vec<_>>>()?;
                format!("({})", parts.join(" OR "))
            }
        };
        Ok(sql)
    }
}

/// Build a `WHERE` clause for a conjunction of filters.
pub(crate) fn where_clause(
    filters: &[ProductFilter],
    params: &mut Vec<Box<dyn ToSql>>,
) -> Result<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let parts = filters
        .iter()
        .map(|f| f.to_sql(params))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Title,
    Category,
    Price,
    Rating,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Category => "category",
            Self::Price => "price",
            Self::Rating => "rating",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "title" => Some(Self::Title),
            "category" => Some(Self::Category),
            "price" => Some(Self::Price),
            "rating" => Some(Self::Rating),
            "created_at" | "created" => Some(Self::CreatedAt),
            "updated_at" | "updated" => Some(Self::UpdatedAt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Parse `price` / `-price` into a sort key.
pub fn parse_sort(s: &str) -> Option<(SortField, SortOrder)> {
    let s = s.trim();
    match s.strip_prefix('-') {
        Some(field) => SortField::from_str(field).map(|f| (f, SortOrder::Desc)),
        None => SortField::from_str(s.trim_start_matches('+')).map(|f| (f, SortOrder::Asc)),
    }
}

/// A page request against the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductQuery {
    /// All must hold.
    pub filters: Vec<ProductFilter>,
    pub sort: Vec<(SortField, SortOrder)>,
    /// Falls back to the store's default page size.
    pub limit: Option<usize>,
    pub skip: usize,
}

impl ProductQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: ProductFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_by(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort.push((field, order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

impl CatalogStore {
    /// Run a query. `id ASC` is always the final sort key, so pages are
    /// stable whether or not a sort is given.
    pub fn find(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        let mut sql = format!("SELECT {} FROM products", PRODUCT_COLUMNS);
        sql.push_str(&where_clause(&query.filters, &mut params)?);

        let mut order: Vec<String> = query
            .sort
            .iter()
            .map(|(field, dir)| {
                let dir = match dir {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                format!("{} {}", field.column(), dir)
            })
            .collect();
        order.push("id ASC".to_string());
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));

        let limit = query.limit.unwrap_or(self.default_limit);
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(Box::new(limit as i64));
        params.push(Box::new(query.skip as i64));

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let products = stmt
            .query_map(param_refs.as_slice(), product_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(products)
    }

    /// Count products matching all filters.
    pub fn count(&self, filters: &[ProductFilter]) -> Result<u64> {
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) FROM products{}",
            where_clause(filters, &mut params)?
        );
        let conn = self.connect()?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classify, ErrorKind};
    use crate::models::NewProduct;
    use tempfile::tempdir;

    fn seeded() -> (tempfile::TempDir, CatalogStore) {
        let dir = tempdir().unwrap();
        let store = CatalogStore::open(&dir.path().join("catalog.db")).unwrap();
        for product in [
            NewProduct::new("Gaming Laptop", "computers")
                .with_price(1500.0)
                .with_rating(5),
            NewProduct::new("Office Laptop", "computers")
                .with_price(700.0)
                .with_rating(3),
            NewProduct::new("Tablet", "computers").with_price(300.0),
            NewProduct::new("Phone", "phones").with_price(700.0).with_rating(4),
            NewProduct::new("Case", "phones"),
        ] {
            store.upsert(&product).unwrap();
        }
        (dir, store)
    }

    fn titles(products: &[Product]) -> Vec<&str> {
        products.iter().map(|p| p.title.as_str()).collect()
    }

    #[test]
    fn test_find_without_filters_uses_insertion_order() {
        let (_dir, store) = seeded();
        let all = store.find(&ProductQuery::new()).unwrap();
        assert_eq!(
            titles(&all),
            vec!["Gaming Laptop", "Office Laptop", "Tablet", "Phone", "Case"]
        );
    }

    #[test]
    fn test_find_conjunction_and_sort() {
        let (_dir, store) = seeded();
        let query = ProductQuery::new()
            .filter(ProductFilter::Range {
                field: ProductField::Price,
                min: Some(300.0),
                max: Some(700.0),
            })
            .filter(ProductFilter::Eq(
                ProductField::Category,
                FieldValue::Text("computers".to_string()),
            ))
            .sort_by(SortField::Price, SortOrder::Desc);
        let found = store.find(&query).unwrap();
        assert_eq!(titles(&found), vec!["Office Laptop", "Tablet"]);
    }

    #[test]
    fn test_equal_sort_keys_break_ties_by_id() {
        let (_dir, store) = seeded();
        let query = ProductQuery::new()
            .filter(ProductFilter::Eq(ProductField::Price, FieldValue::Number(700.0)))
            .sort_by(SortField::Price, SortOrder::Desc);
        let found = store.find(&query).unwrap();
        assert_eq!(titles(&found), vec!["Office Laptop", "Phone"]);
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let (_dir, store) = seeded();
        let query =
            ProductQuery::new().filter(ProductFilter::Contains(ProductField::Title, "LAPTOP".into()));
        assert_eq!(store.find(&query).unwrap().len(), 2);
    }

    #[test]
    fn test_regex_and_or() {
        let (_dir, store) = seeded();
        let query = ProductQuery::new().filter(ProductFilter::Or(vec![
            ProductFilter::Matches(ProductField::Title, "^(Tab|Pho)".into()),
            ProductFilter::IsMissing(ProductField::Price),
        ]));
        let found = store.find(&query).unwrap();
        assert_eq!(titles(&found), vec!["Tablet", "Phone", "Case"]);
    }

    #[test]
    fn test_invalid_regex_is_validation_error() {
        let (_dir, store) = seeded();
        let query =
            ProductQuery::new().filter(ProductFilter::Matches(ProductField::Title, "(".into()));
        let err = store.find(&query).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_limit_and_skip_page_through() {
        let (_dir, store) = seeded();
        let first = store.find(&ProductQuery::new().limit(2)).unwrap();
        let second = store.find(&ProductQuery::new().limit(2).skip(2)).unwrap();
        assert_eq!(titles(&first), vec!["Gaming Laptop", "Office Laptop"]);
        assert_eq!(titles(&second), vec!["Tablet", "Phone"]);
    }

    #[test]
    fn test_default_limit_bounds_scans() {
        let (_dir, store) = seeded();
        let store = store.with_default_limit(3);
        assert_eq!(store.find(&ProductQuery::new()).unwrap().len(), 3);
    }

    #[test]
    fn test_count_with_filters() {
        let (_dir, store) = seeded();
        let filters = [ProductFilter::Eq(
            ProductField::Category,
            FieldValue::Text("phones".into()),
        )];
        assert_eq!(store.count(&filters).unwrap(), 2);
        assert_eq!(store.count(&[]).unwrap(), 5);
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(parse_sort("-price"), Some((SortField::Price, SortOrder::Desc)));
        assert_eq!(parse_sort("title"), Some((SortField::Title, SortOrder::Asc)));
        assert_eq!(parse_sort("bogus"), None);
    }
}

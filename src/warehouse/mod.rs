//! Warehouse: relational tables the served zone is projected into.
//!
//! Every load replaces a table wholesale. Derived views are owned by
//! downstream reporting and are only ever dropped here.

mod sqlite;

pub use sqlite::SqliteWarehouse;

use crate::error::{Classify, ErrorKind};
use crate::table::Table;

pub type Result<T> = std::result::Result<T, WarehouseError>;

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Invalid table name '{0}'")]
    InvalidName(String),
    #[error("Invalid snapshot for {table}: {reason}")]
    InvalidSnapshot { table: String, reason: String },
    #[error("Table not found: {0}")]
    TableNotFound(String),
    #[error("Row count mismatch in {table}: expected {expected}, found {actual}")]
    CountMismatch {
        table: String,
        expected: u64,
        actual: u64,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for WarehouseError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Database(_) | Self::CountMismatch { .. } | Self::Io(_) => ErrorKind::Storage,
            Self::InvalidName(_) | Self::InvalidSnapshot { .. } => ErrorKind::Validation,
            Self::TableNotFound(_) => ErrorKind::NotFound,
        }
    }
}

/// Trait for warehouse backends.
pub trait Warehouse: Send + Sync {
    /// Atomically replace `name` with exactly the rows of `table`. Returns the
    /// verified row count. On failure the previous table stays intact.
    fn replace_table(&self, name: &str, table: &Table) -> Result<u64>;

    /// Drop every derived view. Returns the dropped view names.
    fn drop_views(&self) -> Result<Vec<String>>;

    fn row_count(&self, name: &str) -> Result<u64>;

    fn table_exists(&self, name: &str) -> Result<bool>;

    /// Table names, sorted.
    fn tables(&self) -> Result<Vec<String>>;

    /// Drop every view and table. Returns the dropped names.
    fn reset(&self) -> Result<Vec<String>>;
}

/// Table names are generated (`fact_books`, `dim_partners`); anything
/// outside `[A-Za-z0-9_]` is rejected.
pub fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(WarehouseError::InvalidName(name.to_string()))
    }
}

/// Double-quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("fact_books").is_ok());
        assert!(validate_table_name("dim_partners").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1abc").is_err());
        assert!(validate_table_name("books; DROP TABLE x").is_err());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("price"), "\"price\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}

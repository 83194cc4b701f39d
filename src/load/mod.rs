//! Load stage: project the latest cleaned snapshot of a domain into its
//! warehouse table, replacing the table wholesale.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::{Classify, ErrorKind};
use crate::models::Domain;
use crate::table::{Table, TableError};
use crate::warehouse::{Warehouse, WarehouseError};
use crate::zones::{latest_cleaned, with_retry, RetryPolicy, Zone, ZoneError, ZoneStore};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Zone(#[from] ZoneError),
    #[error("Failed to decode {key}: {source}")]
    Decode { key: String, source: TableError },
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

impl Classify for LoadError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Zone(e) => e.kind(),
            Self::Decode { source, .. } => source.kind(),
            Self::Warehouse(e) => e.kind(),
        }
    }
}

/// Result of `LoadStage::load`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// No cleaned snapshot exists for the domain.
    NoInput,
    Loaded {
        cleaned_key: String,
        table: String,
        rows: u64,
    },
}

pub struct LoadStage {
    zones: Arc<dyn ZoneStore>,
    warehouse: Arc<dyn Warehouse>,
    retry: RetryPolicy,
}

impl LoadStage {
    pub fn new(zones: Arc<dyn ZoneStore>, warehouse: Arc<dyn Warehouse>, retry: RetryPolicy) -> Self {
        Self {
            zones,
            warehouse,
            retry,
        }
    }

    /// Drop derived views before any table is replaced.
    pub fn teardown_views(&self) -> Result<Vec<String>, LoadError> {
        Ok(self.warehouse.drop_views()?)
    }

    /// Replace the domain's table with its latest cleaned snapshot.
    pub async fn load(&self, domain: Domain) -> Result<LoadOutcome, LoadError> {
        let zones = self.zones.as_ref();
        let prefix = domain.zone_prefix();
        let prefix = prefix.as_str();

        let objects = with_retry(&self.retry, "list cleaned", move || {
            zones.list(Zone::Cleaned, prefix)
        })
        .await?;
        let Some(latest) = latest_cleaned(&objects, domain) else {
            info!("No cleaned snapshot for {}, skipping load", domain);
            return Ok(LoadOutcome::NoInput);
        };
        let key = latest.key.as_str();

        let bytes =
            with_retry(&self.retry, "get cleaned", move || zones.get(Zone::Cleaned, key)).await?;
        let snapshot = Table::from_csv(&bytes).map_err(|source| LoadError::Decode {
            key: key.to_string(),
            source,
        })?;

        let table = domain.table_name();
        let rows = self.warehouse.replace_table(&table, &snapshot.table)?;
        info!(
            "Loaded {} rows from {} into {}",
            rows,
            Zone::Cleaned.uri(key),
            table
        );

        Ok(LoadOutcome::Loaded {
            cleaned_key: key.to_string(),
            table,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::SqliteWarehouse;
    use crate::zones::InMemoryZoneStore;
    use tempfile::tempdir;

    fn csv_with_rows(n: usize) -> Vec<u8> {
        let mut table = Table::new(vec!["title".into(), "price_gbp".into()]);
        for i in 0..n {
            table.rows.push(vec![format!("Book {}", i), "1.0".into()]);
        }
        table.to_csv().unwrap()
    }

    async fn setup() -> (tempfile::TempDir, Arc<InMemoryZoneStore>, Arc<SqliteWarehouse>, LoadStage) {
        let dir = tempdir().unwrap();
        let zones = Arc::new(InMemoryZoneStore::new());
        zones.ensure_zones().await.unwrap();
        let warehouse = Arc::new(SqliteWarehouse::open(&dir.path().join("wh.db")).unwrap());
        let stage = LoadStage::new(zones.clone(), warehouse.clone(), RetryPolicy::default());
        (dir, zones, warehouse, stage)
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_skipped() {
        let (_dir, _zones, _warehouse, stage) = setup().await;
        assert_eq!(stage.load(Domain::Books).await.unwrap(), LoadOutcome::NoInput);
    }

    #[tokio::test]
    async fn test_second_load_replaces_first() {
        let (_dir, zones, warehouse, stage) = setup().await;
        zones
            .put(
                Zone::Cleaned,
                "books/books_20240101_000000_cleaned.csv",
                &csv_with_rows(100),
                "text/csv",
            )
            .await
            .unwrap();
        stage.load(Domain::Books).await.unwrap();
        assert_eq!(warehouse.row_count("fact_books").unwrap(), 100);

        zones
            .put(
                Zone::Cleaned,
                "books/books_20240102_000000_cleaned.csv",
                &csv_with_rows(37),
                "text/csv",
            )
            .await
            .unwrap();
        let outcome = stage.load(Domain::Books).await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                cleaned_key: "books/books_20240102_000000_cleaned.csv".to_string(),
                table: "fact_books".to_string(),
                rows: 37,
            }
        );
        assert_eq!(warehouse.row_count("fact_books").unwrap(), 37);
    }

    #[tokio::test]
    async fn test_teardown_drops_views() {
        let (dir, _zones, warehouse, stage) = setup().await;
        warehouse
            .replace_table("fact_books", &Table::from_csv(&csv_with_rows(1)).unwrap().table)
            .unwrap();
        let conn = rusqlite::Connection::open(dir.path().join("wh.db")).unwrap();
        conn.execute_batch("CREATE VIEW v_top AS SELECT * FROM fact_books;")
            .unwrap();
        drop(conn);

        assert_eq!(stage.teardown_views().unwrap(), vec!["v_top"]);
    }
}

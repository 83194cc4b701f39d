//! Catalog export into the served zone.

use chrono::{DateTime, Utc};
use tracing::info;

use super::ingest::RAW_TIMESTAMP_FORMAT;
use crate::catalog::{CatalogError, CatalogStore};
use crate::error::{Classify, ErrorKind};
use crate::models::Product;
use crate::table::TableFormat;
use crate::zones::{with_retry, RetryPolicy, Zone, ZoneError, ZoneStore};

/// Folder of catalog exports inside the served zone.
pub const EXPORT_FOLDER: &str = "catalog";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Zone(#[from] ZoneError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV writer error: {0}")]
    Flush(String),
}

impl Classify for ExportError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Catalog(e) => e.kind(),
            Self::Zone(e) => e.kind(),
            Self::Csv(_) | Self::Json(_) | Self::Flush(_) => ErrorKind::Validation,
        }
    }
}

pub fn export_key(format: TableFormat, at: DateTime<Utc>) -> String {
    format!(
        "{}/products_export_{}.{}",
        EXPORT_FOLDER,
        at.format(RAW_TIMESTAMP_FORMAT),
        format.extension()
    )
}

fn encode(products: &[Product], format: TableFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        TableFormat::Json => Ok(serde_json::to_vec_pretty(products)?),
        TableFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for product in products {
                writer.serialize(product)?;
            }
            writer
                .into_inner()
                .map_err(|e| ExportError::Flush(e.to_string()))
        }
    }
}

/// Serialize every product into the served zone. Returns the object URI.
pub async fn export_products(
    catalog: &CatalogStore,
    zones: &dyn ZoneStore,
    retry: &RetryPolicy,
    format: TableFormat,
    at: DateTime<Utc>,
) -> Result<String, ExportError> {
    let products = catalog.all_products()?;
    let payload = encode(&products, format)?;
    let key = export_key(format, at);

    let k = key.as_str();
    let bytes = payload.as_slice();
    let uri = with_retry(retry, "put export", move || {
        zones.put(Zone::Served, k, bytes, format.content_type())
    })
    .await?;
    info!("Exported {} products to {}", products.len(), uri);
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewProduct;
    use crate::table::Table;
    use crate::zones::InMemoryZoneStore;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_export_writes_served_object() {
        let dir = tempdir().unwrap();
        let catalog = CatalogStore::open(&dir.path().join("catalog.db")).unwrap();
        catalog
            .upsert(&NewProduct::new("Lamp", "home").with_price(20.0))
            .unwrap();
        catalog.upsert(&NewProduct::new("Chair", "home")).unwrap();

        let zones = InMemoryZoneStore::new();
        zones.ensure_zones().await.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let uri = export_products(&catalog, &zones, &RetryPolicy::default(), TableFormat::Csv, at)
            .await
            .unwrap();
        assert_eq!(uri, "zone://served/catalog/products_export_20240501_120000.csv");

        let bytes = zones
            .get(Zone::Served, "catalog/products_export_20240501_120000.csv")
            .await
            .unwrap();
        let table = Table::from_csv(&bytes).unwrap().table;
        assert_eq!(table.row_count(), 2);
        let title = table.column_index("title").unwrap();
        assert_eq!(table.rows[0][title], "Lamp");
    }

    #[tokio::test]
    async fn test_json_export_round_trips_products() {
        let dir = tempdir().unwrap();
        let catalog = CatalogStore::open(&dir.path().join("catalog.db")).unwrap();
        catalog
            .upsert(&NewProduct::new("Lamp", "home").with_rating(4))
            .unwrap();

        let zones = InMemoryZoneStore::new();
        zones.ensure_zones().await.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        export_products(&catalog, &zones, &RetryPolicy::default(), TableFormat::Json, at)
            .await
            .unwrap();

        let bytes = zones
            .get(Zone::Served, "catalog/products_export_20240501_120000.json")
            .await
            .unwrap();
        let products: Vec<Product> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].rating, Some(4));
    }
}

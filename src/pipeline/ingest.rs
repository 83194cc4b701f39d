//! Ingestion: raw payload producers and catalog ingestion.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogError, CatalogStore, UpsertOutcome};
use crate::error::{Classify, ErrorKind};
use crate::models::{Domain, NewProduct, RunCounts, RunLogEntry, RunStatus};
use crate::table::{Table, TableError, TableFormat};
use crate::transform::{collapse_line_breaks, collapse_whitespace, parse_number, parse_rating};
use crate::zones::{with_retry, RetryPolicy, Zone, ZoneError, ZoneStore};

/// Timestamp format of raw object keys (zero-padded, sortable).
pub const RAW_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Run-log source of catalog ingestion runs.
pub const CATALOG_INGEST_SOURCE: &str = "catalog_ingest";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Decode(#[from] TableError),
    #[error(transparent)]
    Zone(#[from] ZoneError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl Classify for IngestError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            Self::Io { .. } => ErrorKind::Storage,
            Self::UnsupportedFormat(_) => ErrorKind::Validation,
            Self::Decode(e) => e.kind(),
            Self::Zone(e) => e.kind(),
            Self::Catalog(e) => e.kind(),
        }
    }
}

/// One fetched payload, as produced by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub bytes: Vec<u8>,
    pub format: TableFormat,
}

/// Producer of raw payloads for one domain.
#[async_trait]
pub trait Ingestor: Send + Sync {
    fn domain(&self) -> Domain;

    async fn fetch(&self) -> Result<RawPayload, IngestError>;
}

/// Reads a local export file (CSV or JSON).
#[derive(Debug, Clone)]
pub struct FileIngestor {
    domain: Domain,
    path: PathBuf,
}

impl FileIngestor {
    pub fn new(domain: Domain, path: impl Into<PathBuf>) -> Self {
        Self {
            domain,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Format of a local file, from its extension.
pub fn format_of(path: &Path) -> Result<TableFormat, IngestError> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(TableFormat::from_extension)
        .ok_or_else(|| IngestError::UnsupportedFormat(path.display().to_string()))
}

#[async_trait]
impl Ingestor for FileIngestor {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn fetch(&self) -> Result<RawPayload, IngestError> {
        let format = format_of(&self.path)?;
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| IngestError::Io {
                path: self.path.clone(),
                source,
            })?;
        debug!("Read {} bytes from {}", bytes.len(), self.path.display());
        Ok(RawPayload { bytes, format })
    }
}

/// Key of the raw object for a payload fetched at `at`.
pub fn raw_key(domain: Domain, format: TableFormat, at: DateTime<Utc>) -> String {
    format!(
        "{}{}_{}.{}",
        domain.zone_prefix(),
        domain.raw_file_prefix(),
        at.format(RAW_TIMESTAMP_FORMAT),
        format.extension()
    )
}

/// Write a payload to the raw zone. Returns the object key.
pub async fn write_raw(
    zones: &dyn ZoneStore,
    retry: &RetryPolicy,
    domain: Domain,
    payload: &RawPayload,
    at: DateTime<Utc>,
) -> Result<String, IngestError> {
    let key = raw_key(domain, payload.format, at);
    let k = key.as_str();
    let bytes = payload.bytes.as_slice();
    let content_type = payload.format.content_type();
    let uri = with_retry(retry, "put raw", move || {
        zones.put(Zone::Raw, k, bytes, content_type)
    })
    .await?;
    info!("Wrote {} bytes to {}", bytes.len(), uri);
    Ok(key)
}

/// Map a decoded export onto catalog products.
///
/// Column names follow the commerce export (`title`, `category`,
/// `subcategory`, `description`, `price`, `rating`); `name` is accepted for
/// the title. Unparsable numbers become missing values.
pub fn products_from_table(table: &Table) -> Vec<NewProduct> {
    let index = |names: &[&str]| names.iter().find_map(|n| table.column_index(n));
    let title = index(&["title", "name"]);
    let category = index(&["category"]);
    let subcategory = index(&["subcategory"]);
    let description = index(&["description"]);
    let price = index(&["price", "price_gbp"]);
    let rating = index(&["rating"]);

    let text = |row: &[String], idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| row.get(i))
            .map(|v| collapse_whitespace(v))
            .filter(|v| !v.is_empty())
    };

    table
        .rows
        .iter()
        .map(|row| NewProduct {
            title: text(row, title).unwrap_or_default(),
            category: text(row, category),
            subcategory: text(row, subcategory),
            description: description
                .and_then(|i| row.get(i))
                .map(|v| collapse_line_breaks(v))
                .filter(|v| !v.is_empty()),
            price: price.and_then(|i| row.get(i)).and_then(|v| parse_number(v)),
            rating: rating.and_then(|i| row.get(i)).and_then(|v| parse_rating(v)),
        })
        .collect()
}

/// Read a local CSV or JSON export into catalog products.
pub fn read_products(path: &Path) -> Result<Vec<NewProduct>, IngestError> {
    let format = format_of(path)?;
    let bytes = std::fs::read(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = Table::decode(&bytes, format)?;
    if decoded.skipped > 0 {
        warn!(
            "Skipped {} malformed rows in {}",
            decoded.skipped,
            path.display()
        );
    }
    Ok(products_from_table(&decoded.table))
}

/// Totals of one catalog ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogIngestSummary {
    pub read: u64,
    pub inserted: u64,
    pub updated: u64,
    pub rejected: u64,
    pub prices_recorded: u64,
    pub status: RunStatus,
    pub errors: Vec<String>,
}

impl CatalogIngestSummary {
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            read: self.read,
            written: self.inserted + self.updated,
            skipped: self.rejected,
        }
    }
}

fn ingest_status(read: u64, written: u64, rejected: u64) -> RunStatus {
    if read > 0 && written == 0 {
        RunStatus::Failed
    } else if rejected > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Success
    }
}

/// Upsert every product, append a price point for each one with a price,
/// and record the run in the run log.
///
/// Rows with a missing title are rejected and listed in `errors`; the batch
/// carries on. Lock contention never rejects a row, the upsert waits it out.
/// A storage failure ends the run and is returned after a `failed` entry
/// has been logged.
pub fn ingest_products(
    catalog: &CatalogStore,
    products: &[NewProduct],
) -> Result<CatalogIngestSummary, IngestError> {
    let timer = Instant::now();
    let mut summary = CatalogIngestSummary {
        read: products.len() as u64,
        inserted: 0,
        updated: 0,
        rejected: 0,
        prices_recorded: 0,
        status: RunStatus::Success,
        errors: Vec::new(),
    };

    for (row, product) in products.iter().enumerate() {
        match catalog.upsert(product) {
            Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
            Ok(UpsertOutcome::Updated) => summary.updated += 1,
            Err(e) if e.kind() == ErrorKind::Validation => {
                debug!("Rejected row {}: {}", row + 1, e);
                summary.rejected += 1;
                summary.errors.push(format!("row {}: {}", row + 1, e));
                continue;
            }
            Err(e) => return Err(abort(catalog, summary, timer, e)),
        }

        if let (Some(sku), Some(price)) = (product.sku(), product.normalized_price()) {
            match catalog.record_price(&sku, price) {
                Ok(_) => summary.prices_recorded += 1,
                Err(e) => return Err(abort(catalog, summary, timer, e)),
            }
        }
    }

    summary.status = ingest_status(
        summary.read,
        summary.inserted + summary.updated,
        summary.rejected,
    );
    let entry = RunLogEntry::new(CATALOG_INGEST_SOURCE, summary.status, summary.counts())
        .with_duration(timer.elapsed().as_secs_f64())
        .with_errors(summary.errors.clone());
    catalog.log_run(&entry)?;

    info!(
        "Catalog ingest {}: {} inserted, {} updated, {} rejected, {} prices",
        summary.status.as_str(),
        summary.inserted,
        summary.updated,
        summary.rejected,
        summary.prices_recorded
    );
    Ok(summary)
}

fn abort(
    catalog: &CatalogStore,
    mut summary: CatalogIngestSummary,
    timer: Instant,
    error: CatalogError,
) -> IngestError {
    summary.errors.push(error.to_string());
    let entry = RunLogEntry::new(CATALOG_INGEST_SOURCE, RunStatus::Failed, summary.counts())
        .with_duration(timer.elapsed().as_secs_f64())
        .with_errors(summary.errors);
    if let Err(log_error) = catalog.log_run(&entry) {
        warn!("Failed to record aborted ingest run: {}", log_error);
    }
    IngestError::Catalog(error)
}

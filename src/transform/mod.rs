//! Transform stage: latest raw object of a domain in, one cleaned snapshot out.

mod canonical;
mod domains;

pub use canonical::{
    clean_quote_text, collapse_line_breaks, collapse_whitespace, normalize_tags, parse_integer,
    parse_number, parse_rating, pseudonymize_email,
};
pub use domains::{clean_table, CleanBatch, UNKNOWN_AUTHOR};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Classify, ErrorKind};
use crate::models::Domain;
use crate::table::{Table, TableError, TableFormat};
use crate::zones::{
    cleaned_key_for, latest_raw, with_retry, RetryPolicy, Zone, ZoneError, ZoneStore,
};

/// Format of the `cleaned_at` stamp.
pub const CLEANED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Zone(#[from] ZoneError),
    #[error("Failed to decode {key}: {source}")]
    Decode { key: String, source: TableError },
    #[error(transparent)]
    Encode(#[from] TableError),
}

impl Classify for TransformError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Zone(e) => e.kind(),
            Self::Decode { source, .. } => source.kind(),
            Self::Encode(e) => e.kind(),
        }
    }
}

/// Counters for one cleaned snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub source_key: String,
    pub cleaned_key: String,
    pub rows_read: u64,
    pub rows_written: u64,
    pub duplicates_dropped: u64,
    pub rows_skipped: u64,
}

/// Result of `TransformStage::clean`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CleanOutcome {
    /// No raw object exists for the domain.
    NoInput,
    Cleaned(CleanReport),
}

pub struct TransformStage {
    zones: Arc<dyn ZoneStore>,
    retry: RetryPolicy,
}

impl TransformStage {
    pub fn new(zones: Arc<dyn ZoneStore>, retry: RetryPolicy) -> Self {
        Self { zones, retry }
    }

    /// Clean the latest raw object of `domain`.
    pub async fn clean(&self, domain: Domain) -> Result<CleanOutcome, TransformError> {
        self.clean_at(domain, Utc::now()).await
    }

    /// Same as `clean`, stamping `cleaned_at` with the given time.
    pub async fn clean_at(
        &self,
        domain: Domain,
        now: DateTime<Utc>,
    ) -> Result<CleanOutcome, TransformError> {
        let zones = self.zones.as_ref();
        let prefix = domain.zone_prefix();
        let prefix = prefix.as_str();

        let objects =
            with_retry(&self.retry, "list raw", move || zones.list(Zone::Raw, prefix)).await?;
        let Some(latest) = latest_raw(&objects, domain) else {
            info!("No raw object for {}, nothing to clean", domain);
            return Ok(CleanOutcome::NoInput);
        };
        let source_key = latest.key.as_str();
        info!("Cleaning {} from {}", domain, Zone::Raw.uri(source_key));

        let bytes =
            with_retry(&self.retry, "get raw", move || zones.get(Zone::Raw, source_key)).await?;
        let format = TableFormat::from_key(source_key).unwrap_or(TableFormat::Csv);
        let decoded = Table::decode(&bytes, format).map_err(|source| TransformError::Decode {
            key: source_key.to_string(),
            source,
        })?;

        let batch = clean_table(
            domain,
            &decoded.table,
            &now.format(CLEANED_AT_FORMAT).to_string(),
        );
        debug!(
            "{}: {} rows read, {} skipped, {} duplicates",
            domain, batch.rows_read, batch.rows_skipped, batch.duplicates_dropped
        );

        let payload = batch.table.to_csv()?;
        let cleaned_key = cleaned_key_for(domain, source_key);
        let key = cleaned_key.as_str();
        let payload = payload.as_slice();
        let uri = with_retry(&self.retry, "put cleaned", move || {
            zones.put(Zone::Cleaned, key, payload, TableFormat::Csv.content_type())
        })
        .await?;

        let report = CleanReport {
            source_key: source_key.to_string(),
            cleaned_key: cleaned_key.clone(),
            rows_read: batch.rows_read + decoded.skipped,
            rows_written: batch.table.row_count() as u64,
            duplicates_dropped: batch.duplicates_dropped,
            rows_skipped: batch.rows_skipped + decoded.skipped,
        };
        info!(
            "Cleaned {}: {} of {} rows written to {}",
            domain, report.rows_written, report.rows_read, uri
        );
        Ok(CleanOutcome::Cleaned(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::InMemoryZoneStore;
    use chrono::TimeZone;

    async fn stage() -> (Arc<InMemoryZoneStore>, TransformStage) {
        let store = Arc::new(InMemoryZoneStore::new());
        store.ensure_zones().await.unwrap();
        let stage = TransformStage::new(store.clone(), RetryPolicy::default());
        (store, stage)
    }

    #[tokio::test]
    async fn test_no_raw_object_is_noop() {
        let (_store, stage) = stage().await;
        let outcome = stage.clean(Domain::Books).await.unwrap();
        assert_eq!(outcome, CleanOutcome::NoInput);
    }

    #[tokio::test]
    async fn test_cleans_latest_raw_object() {
        let (store, stage) = stage().await;
        store
            .put(
                Zone::Raw,
                "books/books_20240101_000000.csv",
                b"title,price_gbp\nOld,1\n",
                "text/csv",
            )
            .await
            .unwrap();
        store
            .put(
                Zone::Raw,
                "books/books_20240102_000000.csv",
                b"title,price_gbp\nNew,2\nNew,3\n,4\n",
                "text/csv",
            )
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let outcome = stage.clean_at(Domain::Books, now).await.unwrap();
        let CleanOutcome::Cleaned(report) = outcome else {
            panic!("expected a cleaned snapshot");
        };
        assert_eq!(report.source_key, "books/books_20240102_000000.csv");
        assert_eq!(report.cleaned_key, "books/books_20240102_000000_cleaned.csv");
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.rows_written, 1);
        assert_eq!(report.duplicates_dropped, 1);
        assert_eq!(report.rows_skipped, 1);

        let bytes = store
            .get(Zone::Cleaned, "books/books_20240102_000000_cleaned.csv")
            .await
            .unwrap();
        let cleaned = Table::from_csv(&bytes).unwrap().table;
        assert_eq!(cleaned.rows.len(), 1);
        let title = cleaned.column_index("title").unwrap();
        let price = cleaned.column_index("price_gbp").unwrap();
        let stamp = cleaned.column_index("cleaned_at").unwrap();
        assert_eq!(cleaned.rows[0][title], "New");
        assert_eq!(cleaned.rows[0][price], "3.0");
        assert_eq!(cleaned.rows[0][stamp], "2024-01-02 03:04:05");
    }

    #[tokio::test]
    async fn test_json_input_produces_csv() {
        let (store, stage) = stage().await;
        store
            .put(
                Zone::Raw,
                "quotes/quotes_20240101_000000.json",
                br#"[{"text": "Hi", "author": "Me", "tags": "A"}]"#,
                "application/json",
            )
            .await
            .unwrap();
        let outcome = stage.clean(Domain::Quotes).await.unwrap();
        let CleanOutcome::Cleaned(report) = outcome else {
            panic!("expected a cleaned snapshot");
        };
        assert_eq!(report.cleaned_key, "quotes/quotes_20240101_000000_cleaned.csv");
        assert_eq!(report.rows_written, 1);
    }

    #[tokio::test]
    async fn test_malformed_json_is_validation_error() {
        let (store, stage) = stage().await;
        store
            .put(Zone::Raw, "quotes/quotes_1.json", b"{not json", "application/json")
            .await
            .unwrap();
        let err = stage.clean(Domain::Quotes).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_storage_error() {
        let (store, stage) = stage().await;
        store.set_unreachable(true);
        let stage = TransformStage {
            retry: RetryPolicy {
                attempts: 1,
                ..RetryPolicy::default()
            },
            ..stage
        };
        let err = stage.clean(Domain::Books).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}

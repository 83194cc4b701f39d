//! Catalog store: canonical products, their price history and the run log.
//!
//! SQLite via rusqlite, one connection per operation. The database runs in
//! WAL mode with a busy timeout so independent ingestion runs can write
//! concurrently; identity-key convergence comes from the single-statement
//! upsert in `products`.

mod filter;
mod history;
mod products;
mod runs;
mod stats;

pub use filter::{
    parse_sort, FieldValue, ProductField, ProductFilter, ProductQuery, SortField, SortOrder,
};
pub use products::{BulkUpsertSummary, UpsertOutcome};
pub use stats::{
    GlobalStats, GroupStats, PriceBucket, PriceGroup, ValueScore, DEFAULT_PRICE_BUCKETS,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, ErrorCode};

use crate::error::{Classify, ErrorKind};
use crate::zones::backoff_delay;

/// Page size used when a query sets no limit.
pub const DEFAULT_FIND_LIMIT: usize = 100;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const CONTENTION_BACKOFF_MS: u64 = 25;
/// Contended writes back off at most 25ms * 2^5 between attempts.
const CONTENTION_BACKOFF_MAX_EXP: u32 = 5;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for CatalogError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Database(e) if is_contention(e) => ErrorKind::Conflict,
            Self::Database(rusqlite::Error::QueryReturnedNoRows) => ErrorKind::NotFound,
            // A stored value of the wrong type reached a numeric read.
            Self::Database(
                rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::FromSqlConversionFailure(..),
            ) => ErrorKind::Aggregation,
            Self::Database(_) | Self::Serialization(_) | Self::Io(_) => ErrorKind::Storage,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// Whether SQLite reported lock contention rather than a real failure.
pub(crate) fn is_contention(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Pause before retrying a contended write; grows, then stays flat.
fn contention_delay(attempt: u32) -> Duration {
    backoff_delay(attempt.min(CONTENTION_BACKOFF_MAX_EXP), CONTENTION_BACKOFF_MS)
}

/// Run `op` until it stops failing on lock contention. Any other error, or
/// success, is returned as is.
pub(crate) fn retry_contended<T>(what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Err(CatalogError::Database(e)) if is_contention(&e) => {
                tracing::warn!("{} contended (attempt {}), retrying", what, attempt + 1);
                std::thread::sleep(contention_delay(attempt));
                attempt = attempt.saturating_add(1);
            }
            other => return other,
        }
    }
}

trait OptionalExt<T> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Fixed-width UTC timestamp; lexicographic order matches time order.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, defaulting to Unix epoch on error.
pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// SQLite-backed catalog store.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    db_path: PathBuf,
    default_limit: usize,
}

impl CatalogStore {
    /// Open (creating if needed) the catalog at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
            default_limit: DEFAULT_FIND_LIMIT,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Override the page size applied to queries without a limit.
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.create_scalar_function(
            "regexp",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                // Compiled once per statement and reused for every row.
                let re: Arc<Regex> =
                    ctx.get_or_create_aux(0, |pattern| -> std::result::Result<_, BoxError> {
                        Ok(Regex::new(pattern.as_str()?)?)
                    })?;
                let text: Option<String> = ctx.get(1)?;
                Ok(text.map(|t| re.is_match(&t)).unwrap_or(false))
            },
        )?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sku TEXT NOT NULL,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                subcategory TEXT,
                description TEXT,
                price REAL,
                rating INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(title, category)
            );

            CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
            CREATE INDEX IF NOT EXISTS idx_products_subcategory ON products(subcategory);
            CREATE INDEX IF NOT EXISTS idx_products_price ON products(price);
            CREATE INDEX IF NOT EXISTS idx_products_rating ON products(rating);
            CREATE INDEX IF NOT EXISTS idx_products_sku ON products(sku);

            -- Append-only; rows are never updated or deleted
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sku TEXT NOT NULL,
                price REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_price_history_sku
                ON price_history(sku, recorded_at);

            -- Append-only audit trail of pipeline and ingestion runs
            CREATE TABLE IF NOT EXISTS run_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                read_count INTEGER NOT NULL DEFAULT 0,
                written_count INTEGER NOT NULL DEFAULT 0,
                skipped_count INTEGER NOT NULL DEFAULT 0,
                duration_seconds REAL NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]',
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_run_log_timestamp ON run_log(timestamp);
        "#,
        )?;
        Ok(())
    }
}

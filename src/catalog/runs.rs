//! Run log: append-only audit trail of pipeline and ingestion runs.

use rusqlite::params;

use super::{format_timestamp, parse_timestamp, CatalogStore, Result};
use crate::models::{RunCounts, RunLogEntry, RunStatus};

impl CatalogStore {
    /// Append one run-log entry. Returns its row id.
    pub fn log_run(&self, entry: &RunLogEntry) -> Result<i64> {
        let errors = serde_json::to_string(&entry.errors)?;
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO run_log
                (source, status, read_count, written_count, skipped_count,
                 duration_seconds, errors, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                entry.source,
                entry.status.as_str(),
                entry.counts.read as i64,
                entry.counts.written as i64,
                entry.counts.skipped as i64,
                entry.duration_seconds,
                errors,
                format_timestamp(entry.timestamp),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent entries first.
    pub fn run_history(&self, limit: usize) -> Result<Vec<RunLogEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT source, status, read_count, written_count, skipped_count,
                   duration_seconds, errors, timestamp
            FROM run_log
            ORDER BY timestamp DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let entries = stmt
            .query_map(params![limit as i64], |row| {
                let status: String = row.get(1)?;
                let errors: String = row.get(6)?;
                Ok(RunLogEntry {
                    source: row.get(0)?,
                    status: RunStatus::from_str(&status).unwrap_or(RunStatus::Failed),
                    counts: RunCounts {
                        read: row.get::<_, i64>(2)? as u64,
                        written: row.get::<_, i64>(3)? as u64,
                        skipped: row.get::<_, i64>(4)? as u64,
                    },
                    duration_seconds: row.get(5)?,
                    errors: serde_json::from_str(&errors).unwrap_or_default(),
                    timestamp: parse_timestamp(&row.get::<_, String>(7)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    #[test]
    fn test_log_and_read_back_newest_first() {
        let dir = tempdir().unwrap();
        let store = CatalogStore::open(&dir.path().join("catalog.db")).unwrap();

        let mut older = RunLogEntry::new(
            "catalog_ingest",
            RunStatus::Success,
            RunCounts {
                read: 3,
                written: 3,
                skipped: 0,
            },
        );
        older.timestamp = Utc::now() - Duration::minutes(5);
        store.log_run(&older).unwrap();

        let newer = RunLogEntry::new("pipeline", RunStatus::Partial, RunCounts::default())
            .with_duration(1.5)
            .with_errors(vec!["books/clean: boom".to_string()]);
        store.log_run(&newer).unwrap();

        let history = store.run_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source, "pipeline");
        assert_eq!(history[0].status, RunStatus::Partial);
        assert_eq!(history[0].errors, vec!["books/clean: boom"]);
        assert_eq!(history[0].duration_seconds, 1.5);
        assert_eq!(history[1].counts.written, 3);

        assert_eq!(store.run_history(1).unwrap().len(), 1);
    }
}

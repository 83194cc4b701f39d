//! Run-log models: the append-only audit trail of pipeline and ingestion runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status recorded for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Record counters attached to a run-log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Records read from the source.
    pub read: u64,
    /// Records written (inserted, updated, or loaded).
    pub written: u64,
    /// Records dropped or rejected.
    pub skipped: u64,
}

impl RunCounts {
    pub fn add(&mut self, other: RunCounts) {
        self.read += other.read;
        self.written += other.written;
        self.skipped += other.skipped;
    }
}

/// One entry of the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    /// What kind of run this was (`pipeline`, `catalog_ingest`, ...).
    pub source: String,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub duration_seconds: f64,
    #[serde(default)]
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RunLogEntry {
    pub fn new(source: impl Into<String>, status: RunStatus, counts: RunCounts) -> Self {
        Self {
            source: source.into(),
            status,
            counts,
            duration_seconds: 0.0,
            errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = (seconds * 100.0).round() / 100.0;
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }
}

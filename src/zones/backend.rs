//! Zone store contract shared by every backend.
//!
//! A zone store is durable keyed object storage split into three zones.
//! It holds bytes only; selection logic such as "latest object" lives in
//! the callers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Classify, ErrorKind};

/// Result type for zone operations.
pub type ZoneResult<T> = Result<T, ZoneError>;

/// Storage tier of the data lake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// Objects exactly as ingested.
    Raw,
    /// Canonicalized snapshots.
    Cleaned,
    /// Queryable exports.
    Served,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Raw, Zone::Cleaned, Zone::Served];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Cleaned => "cleaned",
            Self::Served => "served",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "raw" | "bronze" => Some(Self::Raw),
            "cleaned" | "silver" => Some(Self::Cleaned),
            "served" | "gold" => Some(Self::Served),
            _ => None,
        }
    }

    /// URI for an object in this zone.
    pub fn uri(&self, key: &str) -> String {
        format!("zone://{}/{}", self.as_str(), key)
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing entry for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Errors from zone store operations.
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("Object not found: {zone}/{key}")]
    NotFound { zone: Zone, key: String },
    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("Zone store unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
}

impl Classify for ZoneError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidKey { .. } => ErrorKind::Validation,
            Self::Unavailable(_) | Self::Io(_) | Self::Timeout { .. } => ErrorKind::Storage,
        }
    }
}

/// Reject keys that could escape their zone or collide with listings.
pub fn validate_key(key: &str) -> ZoneResult<()> {
    let invalid = |reason| {
        Err(ZoneError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("key is empty");
    }
    if key.starts_with('/') {
        return invalid("key must be relative");
    }
    if key.contains('\\') {
        return invalid("key must use '/' separators");
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return invalid("key contains an empty or relative segment");
    }
    Ok(())
}

/// Trait for zone storage backends.
///
/// Implementations must be safe under concurrent callers writing distinct
/// keys. Two writers to the same key race last-write-wins.
#[async_trait]
pub trait ZoneStore: Send + Sync {
    /// Create the three zones if absent. Idempotent.
    async fn ensure_zones(&self) -> ZoneResult<()>;

    /// Store `bytes` at `key`, overwriting any existing object. Returns the object URI.
    async fn put(&self, zone: Zone, key: &str, bytes: &[u8], content_type: &str)
        -> ZoneResult<String>;

    /// Fetch the bytes stored at `key`.
    async fn get(&self, zone: Zone, key: &str) -> ZoneResult<Vec<u8>>;

    /// List objects whose key starts with `prefix`, ordered by key.
    async fn list(&self, zone: Zone, prefix: &str) -> ZoneResult<Vec<ObjectInfo>>;

    /// Check whether an object exists.
    async fn exists(&self, zone: Zone, key: &str) -> ZoneResult<bool> {
        match self.get(zone, key).await {
            Ok(_) => Ok(true),
            Err(ZoneError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

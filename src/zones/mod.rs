//! Zone store: durable keyed object storage split into raw, cleaned and
//! served zones.
//!
//! Backends:
//! - Filesystem (default, one directory per zone)
//! - In-memory (tests and dry runs)

mod backend;
mod fs;
mod latest;
mod memory;
mod retry;

pub use backend::{validate_key, ObjectInfo, Zone, ZoneError, ZoneResult, ZoneStore};
pub use fs::FsZoneStore;
pub use latest::{
    cleaned_key_for, is_cleaned_key, latest_cleaned, latest_raw, select_latest, split_name,
    timestamp_suffix, CLEANED_MARKER, RAW_EXTENSIONS,
};
pub use memory::InMemoryZoneStore;
pub use retry::{backoff_delay, with_retry, RetryPolicy};

use serde::Serialize;

/// Object count and total size of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneStats {
    pub zone: Zone,
    pub objects: u64,
    pub total_bytes: u64,
}

/// Collect per-zone statistics.
pub async fn zone_stats(store: &dyn ZoneStore, policy: &RetryPolicy) -> ZoneResult<Vec<ZoneStats>> {
    let mut stats = Vec::with_capacity(Zone::ALL.len());
    for zone in Zone::ALL {
        let objects = with_retry(policy, "list", move || store.list(zone, "")).await?;
        stats.push(ZoneStats {
            zone,
            objects: objects.len() as u64,
            total_bytes: objects.iter().map(|o| o.size).sum(),
        });
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zone_stats_counts_bytes() {
        let store = InMemoryZoneStore::new();
        store.ensure_zones().await.unwrap();
        store
            .put(Zone::Raw, "books/a.csv", b"12345", "text/csv")
            .await
            .unwrap();
        store
            .put(Zone::Raw, "books/b.csv", b"123", "text/csv")
            .await
            .unwrap();

        let stats = zone_stats(&store, &RetryPolicy::default()).await.unwrap();
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].zone, Zone::Raw);
        assert_eq!(stats[0].objects, 2);
        assert_eq!(stats[0].total_bytes, 8);
        assert_eq!(stats[1].objects, 0);
    }
}

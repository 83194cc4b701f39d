//! In-memory zone store for tests and dry runs.
//!
//! Nothing is persisted. The store can be switched into an unreachable
//! mode to exercise startup and step failure handling.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::backend::{validate_key, ObjectInfo, Zone, ZoneError, ZoneResult, ZoneStore};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    modified_at: DateTime<Utc>,
}

/// In-memory zone store.
#[derive(Clone, Default)]
pub struct InMemoryZoneStore {
    zones: Arc<RwLock<HashMap<Zone, BTreeMap<String, StoredObject>>>>,
    unreachable: Arc<AtomicBool>,
}

impl InMemoryZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `Unavailable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> ZoneResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ZoneError::Unavailable(
                "in-memory store marked unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn missing_zone(zone: Zone) -> ZoneError {
        ZoneError::Unavailable(format!("zone '{}' does not exist", zone))
    }
}

#[async_trait]
impl ZoneStore for InMemoryZoneStore {
    async fn ensure_zones(&self) -> ZoneResult<()> {
        self.check_reachable()?;
        let mut zones = self.zones.write().await;
        for zone in Zone::ALL {
            zones.entry(zone).or_default();
        }
        Ok(())
    }

    async fn put(
        &self,
        zone: Zone,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> ZoneResult<String> {
        self.check_reachable()?;
        validate_key(key)?;
        let mut zones = self.zones.write().await;
        let objects = zones.get_mut(&zone).ok_or_else(|| Self::missing_zone(zone))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                modified_at: Utc::now(),
            },
        );
        Ok(zone.uri(key))
    }

    async fn get(&self, zone: Zone, key: &str) -> ZoneResult<Vec<u8>> {
        self.check_reachable()?;
        validate_key(key)?;
        let zones = self.zones.read().await;
        let objects = zones.get(&zone).ok_or_else(|| Self::missing_zone(zone))?;
        objects
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| ZoneError::NotFound {
                zone,
                key: key.to_string(),
            })
    }

    async fn list(&self, zone: Zone, prefix: &str) -> ZoneResult<Vec<ObjectInfo>> {
        self.check_reachable()?;
        let zones = self.zones.read().await;
        let objects = zones.get(&zone).ok_or_else(|| Self::missing_zone(zone))?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, o)| ObjectInfo {
                key: key.clone(),
                size: o.bytes.len() as u64,
                modified_at: o.modified_at,
            })
            .collect())
    }
}

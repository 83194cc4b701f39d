//! Filesystem zone store.
//!
//! Layout: `{root}/{zone}/{key}`. Writes land in a temp file inside the
//! destination directory and are renamed over the key, so readers only
//! ever see complete objects.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::backend::{validate_key, ObjectInfo, Zone, ZoneError, ZoneResult, ZoneStore};

/// Prefix of in-flight temp files, hidden from listings.
const TEMP_PREFIX: &str = ".tmp-";

/// Zone store backed by a local directory tree.
#[derive(Debug, Clone)]
pub struct FsZoneStore {
    root: PathBuf,
}

impl FsZoneStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn zone_dir(&self, zone: Zone) -> PathBuf {
        self.root.join(zone.as_str())
    }

    fn object_path(&self, zone: Zone, key: &str) -> ZoneResult<PathBuf> {
        validate_key(key)?;
        let mut path = self.zone_dir(zone);
        path.extend(key.split('/'));
        Ok(path)
    }

    fn require_zone(&self, zone: Zone) -> ZoneResult<PathBuf> {
        let dir = self.zone_dir(zone);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(ZoneError::Unavailable(format!(
                "zone directory {} does not exist",
                dir.display()
            )))
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> ZoneError {
    ZoneError::Unavailable(format!("blocking task failed: {}", e))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> ZoneResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ZoneError::Unavailable(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ZoneError::Io(e.error))?;
    Ok(())
}

fn collect_objects(dir: &Path, rel: &str, prefix: &str, out: &mut Vec<ObjectInfo>) -> ZoneResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(TEMP_PREFIX) {
            continue;
        }
        let key = if rel.is_empty() {
            name
        } else {
            format!("{}/{}", rel, name)
        };

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            // Only descend where the prefix can still match.
            if key.starts_with(prefix) || prefix.starts_with(&format!("{}/", key)) {
                collect_objects(&entry.path(), &key, prefix, out)?;
            }
        } else if file_type.is_file() && key.starts_with(prefix) {
            let metadata = entry.metadata()?;
            let modified_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(ObjectInfo {
                key,
                size: metadata.len(),
                modified_at,
            });
        }
    }
    Ok(())
}

#[async_trait]
impl ZoneStore for FsZoneStore {
    async fn ensure_zones(&self) -> ZoneResult<()> {
        for zone in Zone::ALL {
            tokio::fs::create_dir_all(self.zone_dir(zone)).await?;
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
        self.require_zone(zone)?;
        let path = self.object_path(zone, key)?;
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(join_error)??;
        Ok(zone.uri(key))
    }

    async fn get(&self, zone: Zone, key: &str) -> ZoneResult<Vec<u8>> {
        let path = self.object_path(zone, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.require_zone(zone)?;
                Err(ZoneError::NotFound {
                    zone,
                    key: key.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, zone: Zone, prefix: &str) -> ZoneResult<Vec<ObjectInfo>> {
        let dir = self.require_zone(zone)?;
        let prefix = prefix.to_string();
        let mut objects = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            collect_objects(&dir, "", &prefix, &mut out).map(|_| out)
        })
        .await
        .map_err(join_error)??;
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classify, ErrorKind};
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, FsZoneStore) {
        let dir = tempdir().unwrap();
        let store = FsZoneStore::new(dir.path().join("zones"));
        store.ensure_zones().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_ensure_zones_is_idempotent() {
        let (dir, store) = store().await;
        store.ensure_zones().await.unwrap();
        for zone in Zone::ALL {
            assert!(dir.path().join("zones").join(zone.as_str()).is_dir());
        }
    }

    #[tokio::test]
    async fn test_put_overwrites_and_get_reads_back() {
        let (_dir, store) = store().await;
        store
            .put(Zone::Raw, "books/books_1.csv", b"a,b\n", "text/csv")
            .await
            .unwrap();
        store
            .put(Zone::Raw, "books/books_1.csv", b"c,d\n", "text/csv")
            .await
            .unwrap();
        let bytes = store.get(Zone::Raw, "books/books_1.csv").await.unwrap();
        assert_eq!(bytes, b"c,d\n");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.get(Zone::Raw, "books/none.csv").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_prefix_scoped() {
        let (_dir, store) = store().await;
        for key in [
            "books/books_20240102_000000.csv",
            "books/books_20240101_000000.csv",
            "quotes/quotes_20240101_000000.csv",
        ] {
            store.put(Zone::Raw, key, b"x", "text/csv").await.unwrap();
        }

        let listed = store.list(Zone::Raw, "books/").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "books/books_20240101_000000.csv",
                "books/books_20240102_000000.csv"
            ]
        );
        assert_eq!(listed[0].size, 1);

        assert_eq!(store.list(Zone::Raw, "").await.unwrap().len(), 3);
        assert!(store.list(Zone::Raw, "films/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = store().await;
        let err = store
            .put(Zone::Raw, "../outside.csv", b"x", "text/csv")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_missing_root_is_storage_error() {
        let dir = tempdir().unwrap();
        let store = FsZoneStore::new(dir.path().join("never-created"));
        let err = store.list(Zone::Raw, "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}

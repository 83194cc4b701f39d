//! Shared helper functions for CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::CatalogStore;
use crate::config::Settings;
use crate::models::Domain;
use crate::warehouse::SqliteWarehouse;
use crate::zones::{FsZoneStore, Zone};

pub fn open_zones(settings: &Settings) -> Arc<FsZoneStore> {
    Arc::new(FsZoneStore::new(settings.zones_dir.clone()))
}

pub fn open_catalog(settings: &Settings) -> anyhow::Result<CatalogStore> {
    Ok(CatalogStore::open(&settings.catalog_database)?
        .with_default_limit(settings.default_find_limit))
}

pub fn open_warehouse(settings: &Settings) -> anyhow::Result<Arc<SqliteWarehouse>> {
    Ok(Arc::new(SqliteWarehouse::open(&settings.warehouse_database)?))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Truncate a string for column display.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Display an optional number, `-` when missing.
pub fn fmt_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "-".to_string())
}

pub fn parse_domain(s: &str) -> Result<Domain, String> {
    Domain::from_str(s).ok_or_else(|| {
        format!(
            "unknown domain '{}' (expected one of: {})",
            s,
            Domain::ALL.map(|d| d.as_str()).join(", ")
        )
    })
}

pub fn parse_zone(s: &str) -> Result<Zone, String> {
    Zone::from_str(s).ok_or_else(|| format!("unknown zone '{}' (expected raw, cleaned or served)", s))
}

/// Parse `DOMAIN=PATH`.
pub fn parse_input(s: &str) -> Result<(Domain, PathBuf), String> {
    let (domain, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected DOMAIN=PATH, got '{}'", s))?;
    if path.trim().is_empty() {
        return Err(format!("missing path for '{}'", domain));
    }
    Ok((parse_domain(domain)?, PathBuf::from(path.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(
            parse_input("books=/tmp/books.csv").unwrap(),
            (Domain::Books, PathBuf::from("/tmp/books.csv"))
        );
        assert!(parse_input("books").is_err());
        assert!(parse_input("movies=/tmp/x.csv").is_err());
        assert!(parse_input("books=").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long title", 10), "a very ...");
    }

    #[test]
    fn test_fmt_opt() {
        assert_eq!(fmt_opt(Some(1.5)), "1.50");
        assert_eq!(fmt_opt(None), "-");
    }
}

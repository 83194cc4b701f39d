//! Configuration management for harvestlake.
//!
//! Resolution order, lowest to highest priority: built-in defaults, config
//! file, environment, command-line flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{DEFAULT_FIND_LIMIT, DEFAULT_PRICE_BUCKETS};
use crate::models::Domain;
use crate::zones::RetryPolicy;

/// Base name of config files (`harvestlake.toml`, `.json`, `.yaml`, `.yml`).
pub const CONFIG_BASENAME: &str = "harvestlake";

pub const DEFAULT_CATALOG_FILENAME: &str = "catalog.db";
pub const DEFAULT_WAREHOUSE_FILENAME: &str = "warehouse.db";
const ZONES_SUBDIR: &str = "zones";

pub const ENV_DATA_DIR: &str = "HARVEST_DATA_DIR";
pub const ENV_CATALOG_DB: &str = "HARVEST_CATALOG_DB";
pub const ENV_WAREHOUSE_DB: &str = "HARVEST_WAREHOUSE_DB";
pub const ENV_TIMEOUT_SECS: &str = "HARVEST_TIMEOUT_SECS";

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Root of the zone store; one subdirectory per zone.
    pub zones_dir: PathBuf,
    pub catalog_database: PathBuf,
    pub warehouse_database: PathBuf,
    /// Domains processed by `run` when none are named.
    pub domains: Vec<Domain>,
    /// Timeout applied to each zone operation attempt.
    pub operation_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub default_find_limit: usize,
    pub price_buckets: Vec<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("harvestlake");
        Self::with_data_dir(data_dir)
    }
}

impl Settings {
    /// Settings with every path derived from `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            zones_dir: data_dir.join(ZONES_SUBDIR),
            catalog_database: data_dir.join(DEFAULT_CATALOG_FILENAME),
            warehouse_database: data_dir.join(DEFAULT_WAREHOUSE_FILENAME),
            data_dir,
            domains: Domain::ALL.to_vec(),
            operation_timeout_secs: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 200,
            default_find_limit: DEFAULT_FIND_LIMIT,
            price_buckets: DEFAULT_PRICE_BUCKETS.to_vec(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            timeout: Duration::from_secs(self.operation_timeout_secs.max(1)),
        }
    }

    /// Ensure the data and zone directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (label, dir) in [("data", &self.data_dir), ("zones", &self.zones_dir)] {
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {} directory '{}': {}", label, dir.display(), e),
                )
            })?;
        }
        Ok(())
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(catalog) = var(ENV_CATALOG_DB) {
            tracing::debug!("Using {} from environment: {}", ENV_CATALOG_DB, catalog);
            self.catalog_database = expand_path(&catalog);
        }
        if let Some(warehouse) = var(ENV_WAREHOUSE_DB) {
            tracing::debug!("Using {} from environment: {}", ENV_WAREHOUSE_DB, warehouse);
            self.warehouse_database = expand_path(&warehouse);
        }
        if let Some(timeout) = var(ENV_TIMEOUT_SECS) {
            match timeout.trim().parse::<u64>() {
                Ok(secs) => self.operation_timeout_secs = secs,
                Err(_) => tracing::warn!("Ignoring invalid {}={}", ENV_TIMEOUT_SECS, timeout),
            }
        }
    }
}

/// `~`-expanded path.
fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Contents of a config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse_database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_find_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_buckets: Option<Vec<f64>>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a specific file path.
    /// The format follows the extension; anything unknown is read as JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Discover a config file with prefer, then parse it with serde.
    /// `None` when no file is found or the one found does not parse.
    pub async fn discover() -> Option<Self> {
        let found = prefer::load(CONFIG_BASENAME).await.ok()?;
        let path = found.source_path()?.to_path_buf();
        match Self::load_from_path(&path).await {
            Ok(config) => {
                tracing::debug!("Loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    /// Directory relative paths in this config are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let path = expand_path(path_str);
        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }

    /// Known domains from the `domains` key. Unknown names are logged and
    /// dropped.
    pub fn parsed_domains(&self) -> Option<Vec<Domain>> {
        let names = self.domains.as_ref()?;
        let mut domains = Vec::new();
        for name in names {
            match Domain::from_str(name) {
                Some(domain) if !domains.contains(&domain) => domains.push(domain),
                Some(_) => {}
                None => tracing::warn!("Ignoring unknown domain '{}' in config", name),
            }
        }
        Some(domains)
    }

    /// Apply everything except `data_dir`, which shapes the defaults and is
    /// resolved first.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref zones_dir) = self.zones_dir {
            settings.zones_dir = self.resolve_path(zones_dir, base_dir);
        }
        if let Some(ref catalog) = self.catalog_database {
            settings.catalog_database = self.resolve_path(catalog, base_dir);
        }
        if let Some(ref warehouse) = self.warehouse_database {
            settings.warehouse_database = self.resolve_path(warehouse, base_dir);
        }
        if let Some(domains) = self.parsed_domains() {
            settings.domains = domains;
        }
        if let Some(timeout) = self.operation_timeout_secs {
            settings.operation_timeout_secs = timeout;
        }
        if let Some(attempts) = self.retry_attempts {
            settings.retry_attempts = attempts;
        }
        if let Some(delay) = self.retry_base_delay_ms {
            settings.retry_base_delay_ms = delay;
        }
        if let Some(limit) = self.default_find_limit {
            settings.default_find_limit = limit;
        }
        if let Some(ref buckets) = self.price_buckets {
            settings.price_buckets = buckets.clone();
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory (`--data` flag).
    pub data: Option<PathBuf>,
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

/// Load the config file. An explicit path must load; otherwise prefer
/// discovers `harvestlake.*` in its standard locations.
async fn load_file_config(options: &LoadOptions) -> Result<Config, String> {
    // Priority 1: Explicit --config flag
    if let Some(ref config_path) = options.config_path {
        return Config::load_from_path(config_path).await;
    }

    // Priority 2: Auto-discover via prefer
    Ok(Config::discover().await.unwrap_or_default())
}

/// Resolve settings from defaults, config file, environment and flags.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<(Settings, Config), String> {
    let env_data_dir = std::env::var(ENV_DATA_DIR)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| expand_path(&s));
    let flag_data_dir = options.data.as_deref().map(absolute);

    let config = load_file_config(&options).await?;

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    // --data > HARVEST_DATA_DIR > config > default
    let data_dir = flag_data_dir
        .or(env_data_dir)
        .or_else(|| {
            config
                .data_dir
                .as_deref()
                .map(|d| config.resolve_path(d, &base_dir))
        })
        .unwrap_or_else(|| Settings::default().data_dir);

    let mut settings = Settings::with_data_dir(data_dir);
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env(|key| std::env::var(key).ok());

    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_paths_derive_from_data_dir() {
        let settings = Settings::with_data_dir(PathBuf::from("/srv/lake"));
        assert_eq!(settings.zones_dir, PathBuf::from("/srv/lake/zones"));
        assert_eq!(settings.catalog_database, PathBuf::from("/srv/lake/catalog.db"));
        assert_eq!(settings.warehouse_database, PathBuf::from("/srv/lake/warehouse.db"));
        assert_eq!(settings.domains.len(), 4);
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
    }

    #[tokio::test]
    async fn test_toml_config_applies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harvestlake.toml");
        std::fs::write(
            &path,
            r#"
            zones_dir = "lake"
            domains = ["books", "ecommerce", "nope"]
            operation_timeout_secs = 5
            price_buckets = [0.0, 10.0, 20.0]
            "#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::with_data_dir(PathBuf::from("/data"));
        config.apply_to_settings(&mut settings, &config.base_dir().unwrap());

        assert_eq!(settings.zones_dir, dir.path().join("lake"));
        assert_eq!(settings.domains, vec![Domain::Books, Domain::Commerce]);
        assert_eq!(settings.operation_timeout_secs, 5);
        assert_eq!(settings.price_buckets, vec![0.0, 10.0, 20.0]);
        assert_eq!(settings.retry_attempts, 3);
    }

    #[tokio::test]
    async fn test_yaml_and_json_configs_parse() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("harvestlake.yaml");
        std::fs::write(&yaml, "retry_attempts: 7\n").unwrap();
        assert_eq!(
            Config::load_from_path(&yaml).await.unwrap().retry_attempts,
            Some(7)
        );

        let json = dir.path().join("harvestlake.json");
        std::fs::write(&json, r#"{"default_find_limit": 25}"#).unwrap();
        assert_eq!(
            Config::load_from_path(&json).await.unwrap().default_find_limit,
            Some(25)
        );

        std::fs::write(&json, "{").unwrap();
        assert!(Config::load_from_path(&json).await.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_CATALOG_DB, "/tmp/other-catalog.db"),
            (ENV_TIMEOUT_SECS, "12"),
            (ENV_WAREHOUSE_DB, "  "),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::with_data_dir(PathBuf::from("/data"));
        settings.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.catalog_database, PathBuf::from("/tmp/other-catalog.db"));
        assert_eq!(settings.warehouse_database, PathBuf::from("/data/warehouse.db"));
        assert_eq!(settings.operation_timeout_secs, 12);
    }

    #[tokio::test]
    async fn test_explicit_config_path_is_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harvestlake.toml");
        std::fs::write(&path, "retry_attempts = 9\nzones_dir = \"objects\"\n").unwrap();

        let options = LoadOptions {
            config_path: Some(path.clone()),
            data: Some(dir.path().join("data")),
        };
        let (settings, config) = load_settings_with_options(options).await.unwrap();
        assert_eq!(config.source_path, Some(path));
        assert_eq!(settings.retry_attempts, 9);
        assert_eq!(settings.data_dir, dir.path().join("data"));
        assert_eq!(settings.zones_dir, dir.path().join("objects"));
    }

    #[tokio::test]
    async fn test_missing_explicit_config_is_an_error() {
        let dir = tempdir().unwrap();
        let options = LoadOptions {
            config_path: Some(dir.path().join("absent.toml")),
            data: None,
        };
        assert!(load_settings_with_options(options).await.is_err());
    }
}

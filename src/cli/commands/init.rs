//! Initialize command.

use console::style;

use crate::cli::helpers::{open_catalog, open_warehouse, open_zones};
use crate::config::Settings;
use crate::zones::{Zone, ZoneStore};

/// Create the data directory, every zone and both databases.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let zones = open_zones(settings);
    zones.ensure_zones().await?;
    for zone in Zone::ALL {
        println!(
            "  {} Zone {}: {}",
            style("✓").green(),
            zone,
            settings.zones_dir.join(zone.as_str()).display()
        );
    }

    open_catalog(settings)?;
    println!(
        "  {} Catalog: {}",
        style("✓").green(),
        settings.catalog_database.display()
    );
    open_warehouse(settings)?;
    println!(
        "  {} Warehouse: {}",
        style("✓").green(),
        settings.warehouse_database.display()
    );

    println!(
        "{} Initialized harvestlake in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    Ok(())
}

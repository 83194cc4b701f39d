//! Zone store inspection commands.

use console::style;

use crate::cli::helpers::{open_zones, print_json};
use crate::config::Settings;
use crate::zones::{with_retry, zone_stats, Zone, ZoneStore};

pub async fn cmd_zones_list(
    settings: &Settings,
    zone: Zone,
    prefix: &str,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_zones(settings);
    let zones: &dyn ZoneStore = store.as_ref();
    let objects = with_retry(&settings.retry_policy(), "list", move || {
        zones.list(zone, prefix)
    })
    .await?;

    if json {
        return print_json(&objects);
    }
    if objects.is_empty() {
        println!("{} No objects in {}", style("!").yellow(), zone.uri(prefix));
        return Ok(());
    }

    println!("{:<60} {:>10}  Modified", "Key", "Bytes");
    println!("{}", "-".repeat(90));
    for object in &objects {
        println!(
            "{:<60} {:>10}  {}",
            object.key,
            object.size,
            object.modified_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\n{} object(s)", objects.len());
    Ok(())
}

pub async fn cmd_zones_stats(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let store = open_zones(settings);
    let stats = zone_stats(store.as_ref(), &settings.retry_policy()).await?;

    if json {
        return print_json(&stats);
    }
    println!("\n{}", style("Zones").bold());
    println!("{}", "-".repeat(40));
    for zone in &stats {
        println!(
            "{:<10} {:>8} objects {:>12} bytes",
            zone.zone.as_str(),
            zone.objects,
            zone.total_bytes
        );
    }
    Ok(())
}

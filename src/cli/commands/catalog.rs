//! Catalog commands.

use std::path::Path;

use chrono::Utc;
use console::style;

use crate::catalog::{parse_sort, FieldValue, ProductField, ProductFilter, ProductQuery};
use crate::cli::helpers::{fmt_opt, open_catalog, open_zones, print_json, truncate};
use crate::config::Settings;
use crate::models::{Product, RunStatus};
use crate::pipeline::{export_products, ingest_products, read_products};
use crate::table::TableFormat;
use crate::zones::ZoneStore;

/// Upsert products from a local export and record their prices.
pub fn cmd_import(settings: &Settings, file: &Path, json: bool) -> anyhow::Result<()> {
    let catalog = open_catalog(settings)?;
    let products = read_products(file)?;
    let summary = ingest_products(&catalog, &products)?;

    if json {
        return print_json(&summary);
    }
    let marker = match summary.status {
        RunStatus::Success => style("✓").green(),
        RunStatus::Partial => style("!").yellow(),
        RunStatus::Failed => style("✗").red(),
    };
    println!(
        "{} Imported {}: {} inserted, {} updated, {} rejected, {} price points",
        marker,
        file.display(),
        summary.inserted,
        summary.updated,
        summary.rejected,
        summary.prices_recorded
    );
    for error in summary.errors.iter().take(20) {
        println!("  {} {}", style("-").red(), error);
    }
    if summary.errors.len() > 20 {
        println!("  ... and {} more", summary.errors.len() - 20);
    }
    Ok(())
}

pub fn cmd_stats(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let stats = open_catalog(settings)?.global_stats()?;
    if json {
        return print_json(&stats);
    }
    println!("\n{}", style("Catalog").bold());
    println!("{}", "-".repeat(40));
    println!("{:<16} {}", "Products:", stats.total_products);
    println!("{:<16} {}", "Categories:", stats.categories);
    println!("{:<16} {}", "Average price:", fmt_opt(stats.avg_price));
    println!("{:<16} {}", "Min price:", fmt_opt(stats.min_price));
    println!("{:<16} {}", "Max price:", fmt_opt(stats.max_price));
    println!("{:<16} {}", "Average rating:", fmt_opt(stats.avg_rating));
    Ok(())
}

pub fn cmd_categories(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let groups = open_catalog(settings)?.stats_by_category()?;
    if json {
        return print_json(&groups);
    }
    println!(
        "{:<24} {:>6} {:>10} {:>10} {:>10} {:>7}",
        "Category", "Count", "Avg", "Min", "Max", "Rating"
    );
    println!("{}", "-".repeat(72));
    for group in &groups {
        println!(
            "{:<24} {:>6} {:>10} {:>10} {:>10} {:>7}",
            truncate(&group.category, 23),
            group.count,
            fmt_opt(group.avg_price),
            fmt_opt(group.min_price),
            fmt_opt(group.max_price),
            fmt_opt(group.avg_rating)
        );
    }
    Ok(())
}

pub fn cmd_groups(settings: &Settings, category: Option<&str>, json: bool) -> anyhow::Result<()> {
    let groups = open_catalog(settings)?.stats_by_group(category)?;
    if json {
        return print_json(&groups);
    }
    println!(
        "{:<20} {:<20} {:>6} {:>10} {:>7}",
        "Category", "Subcategory", "Count", "Avg", "Rating"
    );
    println!("{}", "-".repeat(67));
    for group in &groups {
        println!(
            "{:<20} {:<20} {:>6} {:>10} {:>7}",
            truncate(&group.category, 19),
            truncate(group.subcategory.as_deref().unwrap_or("-"), 19),
            group.count,
            fmt_opt(group.avg_price),
            fmt_opt(group.avg_rating)
        );
    }
    Ok(())
}

pub fn cmd_distribution(settings: &Settings, buckets: &[f64], json: bool) -> anyhow::Result<()> {
    let distribution = open_catalog(settings)?.price_distribution(buckets)?;
    if json {
        return print_json(&distribution);
    }
    let widest = distribution.iter().map(|b| b.count).max().unwrap_or(0).max(1);
    for bucket in &distribution {
        let bar = "#".repeat(((bucket.count * 40) / widest) as usize);
        println!(
            "{:<18} {:>6}  {:>5}  {}",
            bucket.label(),
            bucket.count,
            fmt_opt(bucket.avg_rating),
            bar
        );
    }
    Ok(())
}

pub fn cmd_expensive(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let products = open_catalog(settings)?.most_expensive_per_category()?;
    if json {
        return print_json(&products);
    }
    println!("{:<20} {:<40} {:>10}", "Category", "Title", "Price");
    println!("{}", "-".repeat(72));
    for product in &products {
        println!(
            "{:<20} {:<40} {:>10}",
            truncate(&product.category, 19),
            truncate(&product.title, 39),
            fmt_opt(product.price)
        );
    }
    Ok(())
}

pub fn cmd_value(settings: &Settings, limit: usize, json: bool) -> anyhow::Result<()> {
    let ranking = open_catalog(settings)?.value_ranking(limit)?;
    if json {
        return print_json(&ranking);
    }
    println!("{:<40} {:>10} {:>6} {:>8}", "Title", "Price", "Rating", "Score");
    println!("{}", "-".repeat(67));
    for entry in &ranking {
        println!(
            "{:<40} {:>10} {:>6} {:>8.2}",
            truncate(&entry.product.title, 39),
            fmt_opt(entry.product.price),
            entry.product.rating.map(|r| r.to_string()).unwrap_or_default(),
            entry.score
        );
    }
    Ok(())
}

pub fn cmd_duplicates(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let groups = open_catalog(settings)?.duplicate_prices()?;
    if json {
        return print_json(&groups);
    }
    if groups.is_empty() {
        println!("{} No shared prices", style("✓").green());
        return Ok(());
    }
    for group in &groups {
        println!(
            "{:>10.2}  x{}  {}",
            group.price,
            group.count,
            truncate(&group.titles.join(", "), 60)
        );
    }
    Ok(())
}

pub fn cmd_history(
    settings: &Settings,
    sku: &str,
    days: Option<u32>,
    json: bool,
) -> anyhow::Result<()> {
    let catalog = open_catalog(settings)?;
    let points = catalog.price_history(sku, days)?;
    if json {
        return print_json(&points);
    }
    if let Some(product) = catalog.get_by_sku(sku)? {
        println!("{} ({})", style(&product.title).bold(), product.category);
    }
    if points.is_empty() {
        println!("{} No price history for {}", style("!").yellow(), sku);
        return Ok(());
    }
    for point in &points {
        println!(
            "{}  {:>10.2}",
            point.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            point.price
        );
    }
    Ok(())
}

pub fn cmd_runs(settings: &Settings, limit: usize, json: bool) -> anyhow::Result<()> {
    let runs = open_catalog(settings)?.run_history(limit)?;
    if json {
        return print_json(&runs);
    }
    println!(
        "{:<20} {:<15} {:<8} {:>6} {:>8} {:>8} {:>8}",
        "Timestamp", "Source", "Status", "Read", "Written", "Skipped", "Secs"
    );
    println!("{}", "-".repeat(80));
    for run in &runs {
        println!(
            "{:<20} {:<15} {:<8} {:>6} {:>8} {:>8} {:>8.2}",
            run.timestamp.format("%Y-%m-%d %H:%M:%S"),
            truncate(&run.source, 14),
            run.status.as_str(),
            run.counts.read,
            run.counts.written,
            run.counts.skipped,
            run.duration_seconds
        );
        for error in &run.errors {
            println!("    {} {}", style("-").red(), truncate(error, 74));
        }
    }
    Ok(())
}

/// Flags of `harvest catalog find`.
pub struct FindArgs {
    pub category: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub search: Option<String>,
    pub sort: Vec<String>,
    pub limit: Option<usize>,
    pub skip: usize,
}

fn build_query(args: FindArgs) -> anyhow::Result<ProductQuery> {
    let mut query = ProductQuery::new().skip(args.skip);
    if let Some(category) = args.category {
        query = query.filter(ProductFilter::Eq(
            ProductField::Category,
            FieldValue::Text(category),
        ));
    }
    if args.min_price.is_some() || args.max_price.is_some() {
        query = query.filter(ProductFilter::Range {
            field: ProductField::Price,
            min: args.min_price,
            max: args.max_price,
        });
    }
    if let Some(search) = args.search {
        query = query.filter(ProductFilter::Contains(ProductField::Title, search));
    }
    for key in &args.sort {
        let (field, order) =
            parse_sort(key).ok_or_else(|| anyhow::anyhow!("unknown sort key '{}'", key))?;
        query = query.sort_by(field, order);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    Ok(query)
}

fn print_products(products: &[Product]) {
    println!(
        "{:<12} {:<36} {:<16} {:>10} {:>6}",
        "SKU", "Title", "Category", "Price", "Rating"
    );
    println!("{}", "-".repeat(84));
    for product in products {
        println!(
            "{:<12} {:<36} {:<16} {:>10} {:>6}",
            product.sku,
            truncate(&product.title, 35),
            truncate(&product.category, 15),
            fmt_opt(product.price),
            product.rating.map(|r| r.to_string()).unwrap_or_default()
        );
    }
}

pub fn cmd_find(settings: &Settings, args: FindArgs, json: bool) -> anyhow::Result<()> {
    let catalog = open_catalog(settings)?;
    let query = build_query(args)?;
    let products = catalog.find(&query)?;
    if json {
        return print_json(&products);
    }
    let total = catalog.count(&query.filters)?;
    print_products(&products);
    println!("\n{} of {} matching product(s)", products.len(), total);
    Ok(())
}

pub async fn cmd_export(settings: &Settings, format: TableFormat, json: bool) -> anyhow::Result<()> {
    let catalog = open_catalog(settings)?;
    let zones = open_zones(settings);
    zones.ensure_zones().await?;
    let uri = export_products(
        &catalog,
        zones.as_ref(),
        &settings.retry_policy(),
        format,
        Utc::now(),
    )
    .await?;

    if json {
        print_json(&serde_json::json!({ "uri": uri }))?;
    } else {
        println!("{} Exported catalog to {}", style("✓").green(), uri);
    }
    Ok(())
}

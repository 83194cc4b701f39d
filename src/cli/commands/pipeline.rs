//! Pipeline commands: run, ingest, clean, load.

use std::path::{Path, PathBuf};

use chrono::Utc;
use console::style;

use crate::cli::helpers::{open_catalog, open_warehouse, open_zones, print_json, truncate};
use crate::config::Settings;
use crate::error::Classify;
use crate::load::{LoadOutcome, LoadStage};
use crate::models::{Domain, RunReport, RunState, StepStatus};
use crate::pipeline::{write_raw, FileIngestor, Ingestor, Orchestrator, RunPlan};
use crate::transform::{CleanOutcome, TransformStage};
use crate::zones::{Zone, ZoneStore};

/// Flags of `harvest run`.
pub struct RunOptions {
    pub domains: Vec<Domain>,
    pub reset: bool,
    pub inputs: Vec<(Domain, PathBuf)>,
    pub ingest: bool,
    pub clean: bool,
    pub load: bool,
}

/// Run the orchestrator and exit non-zero unless every step succeeded.
pub async fn cmd_run(settings: &Settings, options: RunOptions, json: bool) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let zones = open_zones(settings);
    let warehouse = open_warehouse(settings)?;
    let catalog = open_catalog(settings)?;

    let mut orchestrator =
        Orchestrator::new(zones, warehouse, settings.retry_policy()).with_catalog(catalog);
    for (domain, path) in options.inputs {
        orchestrator = orchestrator.with_ingestor(Box::new(FileIngestor::new(domain, path)));
    }

    let plan = RunPlan {
        domains: if options.domains.is_empty() {
            settings.domains.clone()
        } else {
            options.domains
        },
        reset: options.reset,
        ingest: options.ingest,
        clean: options.clean,
        load: options.load,
    };
    let report = orchestrator.run(&plan).await;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n{} {}", style("Run").bold(), report.run_id);
    println!("{}", "-".repeat(72));
    println!(
        "{:<10} {:<9} {:<9} {:>6} {:>8} {:>8}  Detail",
        "Domain", "Step", "Status", "Read", "Written", "Skipped"
    );
    println!("{}", "-".repeat(72));

    for step in &report.steps {
        let status = match step.status {
            StepStatus::Succeeded => style("ok").green(),
            StepStatus::Skipped => style("skipped").dim(),
            StepStatus::Failed => style("FAILED").red(),
        };
        println!(
            "{:<10} {:<9} {:<9} {:>6} {:>8} {:>8}  {}",
            step.domain.map(|d| d.as_str()).unwrap_or("-"),
            step.step.as_str(),
            status,
            step.counts.read,
            step.counts.written,
            step.counts.skipped,
            truncate(step.detail.as_deref().unwrap_or(""), 40)
        );
    }

    println!();
    match report.state {
        RunState::Succeeded => println!(
            "{} Run succeeded in {:.2}s",
            style("✓").green(),
            report.duration_seconds()
        ),
        state => {
            println!(
                "{} Run {} with {} failure(s):",
                style("✗").red(),
                state,
                report.failures.len()
            );
            for failure in &report.failures {
                println!("  {} {}", style("-").red(), failure);
            }
        }
    }
}

/// Write one local file to the raw zone.
pub async fn cmd_ingest(
    settings: &Settings,
    domain: Domain,
    file: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let zones = open_zones(settings);
    zones.ensure_zones().await?;

    let payload = FileIngestor::new(domain, file).fetch().await?;
    let key = write_raw(
        zones.as_ref(),
        &settings.retry_policy(),
        domain,
        &payload,
        Utc::now(),
    )
    .await?;

    if json {
        print_json(&serde_json::json!({ "domain": domain, "key": key }))?;
    } else {
        println!(
            "{} Wrote {} ({} bytes)",
            style("✓").green(),
            Zone::Raw.uri(&key),
            payload.bytes.len()
        );
    }
    Ok(())
}

pub async fn cmd_clean(settings: &Settings, domain: Domain, json: bool) -> anyhow::Result<()> {
    let zones = open_zones(settings);
    let stage = TransformStage::new(zones, settings.retry_policy());
    let outcome = stage.clean(domain).await?;

    if json {
        return print_json(&outcome);
    }
    match outcome {
        CleanOutcome::NoInput => println!(
            "{} No raw object for {}, nothing to clean",
            style("!").yellow(),
            domain
        ),
        CleanOutcome::Cleaned(report) => {
            println!(
                "{} Cleaned {} -> {}",
                style("✓").green(),
                Zone::Raw.uri(&report.source_key),
                Zone::Cleaned.uri(&report.cleaned_key)
            );
            println!(
                "  {} read, {} written, {} duplicates, {} skipped",
                report.rows_read, report.rows_written, report.duplicates_dropped, report.rows_skipped
            );
        }
    }
    Ok(())
}

pub async fn cmd_load(settings: &Settings, domain: Domain, json: bool) -> anyhow::Result<()> {
    let zones = open_zones(settings);
    let warehouse = open_warehouse(settings)?;
    let stage = LoadStage::new(zones, warehouse, settings.retry_policy());

    let views = stage.teardown_views()?;
    let outcome = match stage.load(domain).await {
        Ok(outcome) => outcome,
        Err(e) => anyhow::bail!("Load of {} failed ({}): {}", domain, e.kind().as_str(), e),
    };

    if json {
        return print_json(&outcome);
    }
    if !views.is_empty() {
        println!("  Dropped views: {}", views.join(", "));
    }
    match outcome {
        LoadOutcome::NoInput => println!(
            "{} No cleaned snapshot for {}, nothing to load",
            style("!").yellow(),
            domain
        ),
        LoadOutcome::Loaded {
            cleaned_key,
            table,
            rows,
        } => println!(
            "{} Loaded {} rows from {} into {}",
            style("✓").green(),
            rows,
            Zone::Cleaned.uri(&cleaned_key),
            table
        ),
    }
    Ok(())
}

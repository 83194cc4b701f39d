//! Orchestrator: runs ingest, clean and load per domain and records every
//! step outcome in a structured report.
//!
//! Only an unreachable zone store at startup fails a run. Any later step
//! failure is recorded and the run moves on, ending `PartiallyFailed`.

mod export;
mod ingest;

pub use export::{export_key, export_products, ExportError, EXPORT_FOLDER};
pub use ingest::{
    format_of, ingest_products, products_from_table, raw_key, read_products, write_raw,
    CatalogIngestSummary, FileIngestor, IngestError, Ingestor, RawPayload, CATALOG_INGEST_SOURCE,
    RAW_TIMESTAMP_FORMAT,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::error::Classify;
use crate::load::{LoadOutcome, LoadStage};
use crate::models::{
    Domain, RunCounts, RunLogEntry, RunReport, RunState, Step, StepFailure, StepResult,
    StepStatus,
};
use crate::transform::{CleanOutcome, TransformStage};
use crate::warehouse::Warehouse;
use crate::zones::{with_retry, RetryPolicy, ZoneStore};

/// Run-log source of orchestrated runs.
pub const PIPELINE_SOURCE: &str = "pipeline";

/// Which steps a run executes, and for which domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub domains: Vec<Domain>,
    /// Drop every warehouse table and view before loading.
    pub reset: bool,
    pub ingest: bool,
    pub clean: bool,
    pub load: bool,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            domains: Domain::ALL.to_vec(),
            reset: false,
            ingest: true,
            clean: true,
            load: true,
        }
    }
}

impl RunPlan {
    pub fn for_domains(domains: Vec<Domain>) -> Self {
        Self {
            domains,
            ..Default::default()
        }
    }
}

pub struct Orchestrator {
    zones: Arc<dyn ZoneStore>,
    warehouse: Arc<dyn Warehouse>,
    catalog: Option<CatalogStore>,
    ingestors: HashMap<Domain, Box<dyn Ingestor>>,
    transform: TransformStage,
    loader: LoadStage,
    retry: RetryPolicy,
    state: RunState,
}

impl Orchestrator {
    pub fn new(zones: Arc<dyn ZoneStore>, warehouse: Arc<dyn Warehouse>, retry: RetryPolicy) -> Self {
        Self {
            transform: TransformStage::new(zones.clone(), retry),
            loader: LoadStage::new(zones.clone(), warehouse.clone(), retry),
            zones,
            warehouse,
            catalog: None,
            ingestors: HashMap::new(),
            retry,
            state: RunState::Idle,
        }
    }

    /// Record every run in the catalog's run log.
    pub fn with_catalog(mut self, catalog: CatalogStore) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Register the producer for its domain, replacing any previous one.
    pub fn with_ingestor(mut self, ingestor: Box<dyn Ingestor>) -> Self {
        self.ingestors.insert(ingestor.domain(), ingestor);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn enter(&mut self, step: Step) {
        self.state = RunState::Running(step);
    }

    /// Execute one run.
    pub async fn run(&mut self, plan: &RunPlan) -> RunReport {
        let timer = Instant::now();
        let mut report = RunReport::new(Uuid::new_v4().to_string(), Utc::now());
        info!(
            "Run {} started for {} domain(s)",
            report.run_id,
            plan.domains.len()
        );

        self.enter(Step::Startup);
        let zones = self.zones.as_ref();
        if let Err(e) = with_retry(&self.retry, "ensure zones", move || zones.ensure_zones()).await
        {
            error!("Zone store unreachable: {}", e);
            fail(&mut report, None, Step::Startup, &e);
            return self.finish(report, RunState::Failed, timer);
        }
        succeed(&mut report, None, Step::Startup, RunCounts::default(), None);

        if plan.reset {
            self.enter(Step::Reset);
            match self.warehouse.reset() {
                Ok(dropped) => {
                    let detail = format!("dropped {} objects", dropped.len());
                    succeed(&mut report, None, Step::Reset, RunCounts::default(), Some(detail));
                }
                Err(e) => fail(&mut report, None, Step::Reset, &e),
            }
        }

        let mut views_dropped = false;
        for &domain in &plan.domains {
            if plan.ingest {
                self.ingest_step(domain, &mut report).await;
            }
            if plan.clean {
                self.clean_step(domain, &mut report).await;
            }
            if plan.load {
                if !views_dropped {
                    self.teardown_step(&mut report);
                    views_dropped = true;
                }
                self.load_step(domain, &mut report).await;
            }
        }

        let state = if report.failures.is_empty() {
            RunState::Succeeded
        } else {
            RunState::PartiallyFailed
        };
        self.finish(report, state, timer)
    }

    async fn ingest_step(&mut self, domain: Domain, report: &mut RunReport) {
        self.enter(Step::Ingest);
        let Some(ingestor) = self.ingestors.get(&domain) else {
            skip(report, domain, Step::Ingest, "no ingestor registered");
            return;
        };

        let result = match ingestor.fetch().await {
            Ok(payload) => {
                write_raw(self.zones.as_ref(), &self.retry, domain, &payload, Utc::now()).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(key) => {
                let counts = RunCounts {
                    written: 1,
                    ..Default::default()
                };
                succeed(report, Some(domain), Step::Ingest, counts, Some(key));
            }
            Err(e) => fail(report, Some(domain), Step::Ingest, &e),
        }
    }

    async fn clean_step(&mut self, domain: Domain, report: &mut RunReport) {
        self.enter(Step::Clean);
        match self.transform.clean(domain).await {
            Ok(CleanOutcome::NoInput) => skip(report, domain, Step::Clean, "no raw object"),
            Ok(CleanOutcome::Cleaned(clean)) => {
                let counts = RunCounts {
                    read: clean.rows_read,
                    written: clean.rows_written,
                    skipped: clean.rows_skipped + clean.duplicates_dropped,
                };
                succeed(report, Some(domain), Step::Clean, counts, Some(clean.cleaned_key));
            }
            Err(e) => fail(report, Some(domain), Step::Clean, &e),
        }
    }

    fn teardown_step(&mut self, report: &mut RunReport) {
        self.enter(Step::Teardown);
        match self.loader.teardown_views() {
            Ok(views) => {
                let detail = format!("dropped {} views", views.len());
                succeed(report, None, Step::Teardown, RunCounts::default(), Some(detail));
            }
            Err(e) => fail(report, None, Step::Teardown, &e),
        }
    }

    async fn load_step(&mut self, domain: Domain, report: &mut RunReport) {
        self.enter(Step::Load);
        match self.loader.load(domain).await {
            Ok(LoadOutcome::NoInput) => skip(report, domain, Step::Load, "no cleaned snapshot"),
            Ok(LoadOutcome::Loaded { table, rows, .. }) => {
                let counts = RunCounts {
                    read: rows,
                    written: rows,
                    skipped: 0,
                };
                succeed(report, Some(domain), Step::Load, counts, Some(table));
            }
            Err(e) => fail(report, Some(domain), Step::Load, &e),
        }
    }

    fn finish(&mut self, mut report: RunReport, state: RunState, timer: Instant) -> RunReport {
        self.state = state;
        report.state = state;
        report.finished_at = Some(Utc::now());

        match state {
            RunState::Succeeded => info!("Run {} succeeded", report.run_id),
            _ => warn!(
                "Run {} {} with {} failure(s)",
                report.run_id,
                state,
                report.failures.len()
            ),
        }

        if let Some(catalog) = &self.catalog {
            let entry = RunLogEntry::new(PIPELINE_SOURCE, state.run_status(), report.counts())
                .with_duration(timer.elapsed().as_secs_f64())
                .with_errors(report.failures.iter().map(|f| f.to_string()).collect());
            if let Err(e) = catalog.log_run(&entry) {
                warn!("Failed to record run {}: {}", report.run_id, e);
            }
        }
        report
    }
}

fn succeed(
    report: &mut RunReport,
    domain: Option<Domain>,
    step: Step,
    counts: RunCounts,
    detail: Option<String>,
) {
    info!(
        "{}{}: ok{}",
        domain.map(|d| format!("{}/", d)).unwrap_or_default(),
        step,
        detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default()
    );
    report.steps.push(StepResult {
        domain,
        step,
        status: StepStatus::Succeeded,
        counts,
        detail,
    });
}

fn skip(report: &mut RunReport, domain: Domain, step: Step, reason: &str) {
    info!("{}/{}: skipped ({})", domain, step, reason);
    report.steps.push(StepResult {
        domain: Some(domain),
        step,
        status: StepStatus::Skipped,
        counts: RunCounts::default(),
        detail: Some(reason.to_string()),
    });
}

fn fail<E>(report: &mut RunReport, domain: Option<Domain>, step: Step, e: &E)
where
    E: Classify + std::fmt::Display,
{
    let failure = StepFailure {
        domain,
        step,
        kind: e.kind(),
        message: e.to_string(),
    };
    warn!("{} ({})", failure, failure.kind.as_str());
    report.steps.push(StepResult {
        domain,
        step,
        status: StepStatus::Failed,
        counts: RunCounts::default(),
        detail: Some(failure.message.clone()),
    });
    report.failures.push(failure);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::RunStatus;
    use crate::table::TableFormat;
    use crate::warehouse::SqliteWarehouse;
    use crate::zones::{InMemoryZoneStore, Zone};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::tempdir;

    struct StaticIngestor {
        domain: Domain,
        body: &'static str,
    }

    #[async_trait]
    impl Ingestor for StaticIngestor {
        fn domain(&self) -> Domain {
            self.domain
        }

        async fn fetch(&self) -> Result<RawPayload, IngestError> {
            Ok(RawPayload {
                bytes: self.body.as_bytes().to_vec(),
                format: TableFormat::Csv,
            })
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn setup() -> (
        tempfile::TempDir,
        Arc<InMemoryZoneStore>,
        Arc<SqliteWarehouse>,
        CatalogStore,
    ) {
        let dir = tempdir().unwrap();
        let zones = Arc::new(InMemoryZoneStore::new());
        let warehouse = Arc::new(SqliteWarehouse::open(&dir.path().join("wh.db")).unwrap());
        let catalog = CatalogStore::open(&dir.path().join("catalog.db")).unwrap();
        (dir, zones, warehouse, catalog)
    }

    #[tokio::test]
    async fn test_unreachable_zone_store_fails_run() {
        let (_dir, zones, warehouse, catalog) = setup();
        zones.set_unreachable(true);
        let mut orchestrator = Orchestrator::new(zones, warehouse, fast_retry())
            .with_catalog(catalog.clone());

        let report = orchestrator.run(&RunPlan::default()).await;
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(orchestrator.state(), RunState::Failed);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, Step::Startup);
        assert_eq!(report.failures[0].kind, ErrorKind::Storage);
        assert_ne!(report.exit_code(), 0);
        // Nothing past startup ran.
        assert_eq!(report.steps.len(), 1);

        let runs = catalog.run_history(1).unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_full_run_succeeds() {
        let (_dir, zones, warehouse, catalog) = setup();
        let mut orchestrator = Orchestrator::new(zones.clone(), warehouse.clone(), fast_retry())
            .with_catalog(catalog.clone())
            .with_ingestor(Box::new(StaticIngestor {
                domain: Domain::Books,
                body: "title,price,rating\nA,£10.00,Three\nB,£5.50,Five\nA,£11.00,Three\n",
            }));

        let plan = RunPlan::for_domains(vec![Domain::Books]);
        let report = orchestrator.run(&plan).await;
        assert_eq!(report.state, RunState::Succeeded, "{:?}", report.failures);
        assert_eq!(report.exit_code(), 0);
        assert!(report.finished_at.is_some());

        let clean = report.find(Domain::Books, Step::Clean).unwrap();
        assert_eq!(clean.counts.read, 3);
        assert_eq!(clean.counts.written, 2);
        assert_eq!(warehouse.row_count("fact_books").unwrap(), 2);

        let raw = zones.list(Zone::Raw, "books/").await.unwrap();
        assert_eq!(raw.len(), 1);

        let runs = catalog.run_history(1).unwrap();
        assert_eq!(runs[0].source, PIPELINE_SOURCE);
        assert_eq!(runs[0].status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_failing_domain_does_not_stop_others() {
        let (_dir, zones, warehouse, catalog) = setup();
        zones.ensure_zones().await.unwrap();
        zones
            .put(
                Zone::Raw,
                "quotes/quotes_20240101_000000.json",
                b"{not json",
                "application/json",
            )
            .await
            .unwrap();
        zones
            .put(
                Zone::Raw,
                "books/books_20240101_000000.csv",
                b"title\nA\n",
                "text/csv",
            )
            .await
            .unwrap();

        let mut orchestrator = Orchestrator::new(zones, warehouse.clone(), fast_retry())
            .with_catalog(catalog.clone());
        let plan = RunPlan::for_domains(vec![Domain::Quotes, Domain::Books]);
        let report = orchestrator.run(&plan).await;

        assert_eq!(report.state, RunState::PartiallyFailed);
        assert_ne!(report.exit_code(), 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].domain, Some(Domain::Quotes));
        assert_eq!(report.failures[0].step, Step::Clean);
        assert_eq!(report.failures[0].kind, ErrorKind::Validation);

        // Quotes load found nothing to load and was skipped, not failed.
        let quotes_load = report.find(Domain::Quotes, Step::Load).unwrap();
        assert_eq!(quotes_load.status, StepStatus::Skipped);
        assert_eq!(warehouse.row_count("fact_books").unwrap(), 1);

        let runs = catalog.run_history(1).unwrap();
        assert_eq!(runs[0].status, RunStatus::Partial);
        assert!(runs[0].errors[0].starts_with("quotes/clean: "));
    }

    #[tokio::test]
    async fn test_steps_can_be_disabled() {
        let (_dir, zones, warehouse, _catalog) = setup();
        let mut orchestrator = Orchestrator::new(zones, warehouse, fast_retry());
        let plan = RunPlan {
            domains: vec![Domain::Partners],
            reset: true,
            ingest: false,
            clean: true,
            load: false,
        };
        let report = orchestrator.run(&plan).await;
        assert_eq!(report.state, RunState::Succeeded);
        let steps: Vec<Step> = report.steps.iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![Step::Startup, Step::Reset, Step::Clean]);
    }
}

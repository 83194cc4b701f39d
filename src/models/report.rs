//! Structured run results returned by the orchestrator.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Domain, RunCounts, RunStatus};
use crate::error::ErrorKind;

/// One step of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Startup,
    Reset,
    Teardown,
    Ingest,
    Clean,
    Load,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Reset => "reset",
            Self::Teardown => "teardown",
            Self::Ingest => "ingest",
            Self::Clean => "clean",
            Self::Load => "load",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state: `Idle -> Running(step) -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running(Step),
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::PartiallyFailed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running(_) => "running",
            Self::Succeeded => "succeeded",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }

    /// Run-log status for a terminal state.
    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::Succeeded => RunStatus::Success,
            Self::PartiallyFailed => RunStatus::Partial,
            _ => RunStatus::Failed,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running(step) => write!(f, "running({})", step),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Nothing to do (no input, no ingestor registered).
    Skipped,
    Failed,
}

/// Typed outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    /// `None` for run-wide steps (startup, reset, teardown).
    pub domain: Option<Domain>,
    pub step: Step,
    pub status: StepStatus,
    pub counts: RunCounts,
    pub detail: Option<String>,
}

/// A recorded (domain, step, error) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub domain: Option<Domain>,
    pub step: Step,
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.domain {
            Some(domain) => write!(f, "{}/{}: {}", domain, self.step, self.message),
            None => write!(f, "{}: {}", self.step, self.message),
        }
    }
}

/// Result of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub steps: Vec<StepResult>,
    pub failures: Vec<StepFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            state: RunState::Idle,
            steps: Vec::new(),
            failures: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    /// Process exit code: 0 only for a fully successful run.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            RunState::Succeeded => 0,
            RunState::PartiallyFailed => 2,
            _ => 1,
        }
    }

    /// Sum of the counters of every step.
    pub fn counts(&self) -> RunCounts {
        let mut total = RunCounts::default();
        for step in &self.steps {
            total.add(step.counts);
        }
        total
    }

    pub fn duration_seconds(&self) -> f64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    pub fn find(&self, domain: Domain, step: Step) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|s| s.domain == Some(domain) && s.step == step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_is_zero_only_on_success() {
        let mut report = RunReport::new("r1", Utc::now());
        report.state = RunState::Succeeded;
        assert_eq!(report.exit_code(), 0);
        report.state = RunState::PartiallyFailed;
        assert_ne!(report.exit_code(), 0);
        report.state = RunState::Failed;
        assert_ne!(report.exit_code(), 0);
    }

    #[test]
    fn test_failure_display() {
        let failure = StepFailure {
            domain: Some(Domain::Books),
            step: Step::Clean,
            kind: ErrorKind::Validation,
            message: "bad json".to_string(),
        };
        assert_eq!(failure.to_string(), "books/clean: bad json");
    }

    #[test]
    fn test_state_serializes_with_step() {
        let json = serde_json::to_string(&RunState::Running(Step::Load)).unwrap();
        assert_eq!(json, r#"{"state":"running","step":"load"}"#);
        let json = serde_json::to_string(&RunState::Succeeded).unwrap();
        assert_eq!(json, r#"{"state":"succeeded"}"#);
    }
}

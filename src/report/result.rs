//! Case and Step Results
//!
//! Structured outcomes emitted for every executed case. A case's overall
//! status follows its steps: FAIL always wins and sticks, BROKEN sticks
//! over anything but FAIL, otherwise the last step that actually produced
//! a status is taken. The initial NOT_RUN never survives a real outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a step, and of a case as a whole.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotRun,
    Pass,
    Fail,
    Skipped,
    Broken,
}

impl StepStatus {
    /// Short upper-case label for console output.
    pub fn label(&self) -> &'static str {
        match self {
            StepStatus::NotRun => "NOT RUN",
            StepStatus::Pass => "PASS",
            StepStatus::Fail => "FAIL",
            StepStatus::Skipped => "SKIPPED",
            StepStatus::Broken => "BROKEN",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Fail | StepStatus::Broken)
    }
}

/// Result of one step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepResult {
    /// 1-based order within the case
    pub order: usize,
    pub test_object: String,
    pub action: String,
    pub status: StepStatus,

    /// The action was never invoked
    pub no_run: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Free-text log lines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,

    /// Captured screenshot or other artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl StepResult {
    pub fn new(order: usize, test_object: &str, action: &str) -> Self {
        Self {
            order,
            test_object: test_object.to_string(),
            action: action.to_string(),
            status: StepStatus::NotRun,
            no_run: false,
            started_at: None,
            finished_at: None,
            log: Vec::new(),
            artifact: None,
            comment: None,
        }
    }

    /// Marks the step as never invoked with the given terminal status.
    pub fn mark_no_run(&mut self, status: StepStatus, reason: impl Into<String>) {
        self.status = status;
        self.no_run = true;
        self.log.push(reason.into());
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Result of one case unit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CaseResult {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    pub case_type: String,
    pub status: StepStatus,
    pub steps: Vec<StepResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Recordings and other case-level artifacts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,

    /// First failure message seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    /// Worker that executed the case
    pub worker: usize,
}

impl CaseResult {
    pub fn new(name: impl Into<String>, case_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_id: None,
            case_type: case_type.into(),
            status: StepStatus::NotRun,
            steps: Vec::new(),
            started_at: None,
            finished_at: None,
            attachments: Vec::new(),
            failure: None,
            worker: 0,
        }
    }

    /// Folds a step outcome into the case status.
    pub fn apply_status(&mut self, status: StepStatus) {
        self.status = match (self.status, status) {
            (StepStatus::Fail, _) => StepStatus::Fail,
            (_, StepStatus::Fail) => StepStatus::Fail,
            (StepStatus::Broken, _) => StepStatus::Broken,
            (current, StepStatus::NotRun) => current,
            (_, next) => next,
        };
    }

    /// Appends a finished step and updates the case status.
    pub fn record(&mut self, step: StepResult) {
        self.apply_status(step.status);
        if self.failure.is_none() && step.status.is_failure() {
            self.failure = Some(
                step.log
                    .last()
                    .cloned()
                    .unwrap_or_else(|| format!("{}.{} failed", step.test_object, step.action)),
            );
        }
        self.steps.push(step);
    }

    /// Fails the case outside of any step (e.g. session setup).
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.apply_status(StepStatus::Fail);
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }

    pub fn passed(&self) -> bool {
        !self.status.is_failure()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Status counts over a set of case results.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub broken: usize,
    pub skipped: usize,
    pub not_run: usize,
}

impl RunSummary {
    pub fn from_results(results: &[CaseResult]) -> Self {
        let mut summary = RunSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                StepStatus::Pass => summary.passed += 1,
                StepStatus::Fail => summary.failed += 1,
                StepStatus::Broken => summary.broken += 1,
                StepStatus::Skipped => summary.skipped += 1,
                StepStatus::NotRun => summary.not_run += 1,
            }
        }
        summary
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.broken == 0
    }
}

/// Everything a finished run produced.
#[derive(Serialize, Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub cases: Vec<CaseResult>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, mut cases: Vec<CaseResult>) -> Self {
        cases.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            started_at,
            finished_at: Utc::now(),
            summary: RunSummary::from_results(&cases),
            cases,
        }
    }

    pub fn case(&self, name: &str) -> Option<&CaseResult> {
        self.cases.iter().find(|c| c.name == name)
    }
}

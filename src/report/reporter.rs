//! Reporters and Feedback Connectors
//!
//! A [`Reporter`] receives run, case and step events as they happen plus
//! the final [`RunReport`]. Rendering beyond the console summary and the
//! JSON results file is left to external reporters.
//!
//! [`FeedbackConnector`]s publish finished cases to external test
//! management systems, keyed by the case's external test case id.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};

use super::result::{CaseResult, RunReport, StepResult, StepStatus};
use super::timeline::ExecutionTimeline;
use crate::error::{EngineError, Result};

/// Receives execution events. Every method defaults to doing nothing.
pub trait Reporter: Send + Sync {
    fn run_started(&self, _total: usize) {}

    fn case_started(&self, _case_name: &str, _worker: usize) {}

    fn step_finished(&self, _case_name: &str, _step: &StepResult) {}

    /// A step skipped because an earlier step stopped the case.
    fn step_aborted(&self, _case_name: &str, _step: &StepResult) {}

    fn case_finished(&self, _result: &CaseResult) {}

    fn run_finished(&self, _report: &RunReport, _timeline: &ExecutionTimeline) {}
}

/// Publishes case results to an external test management system.
pub trait FeedbackConnector: Send + Sync {
    fn name(&self) -> &str;

    fn publish(&self, external_id: &str, result: &CaseResult) -> std::result::Result<(), String>;
}

/// Forwards every event to several reporters.
#[derive(Default, Clone)]
pub struct Reporters(Vec<Arc<dyn Reporter>>);

impl Reporters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, reporter: Arc<dyn Reporter>) {
        self.0.push(reporter);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Reporter for Reporters {
    fn run_started(&self, total: usize) {
        self.0.iter().for_each(|r| r.run_started(total));
    }

    fn case_started(&self, case_name: &str, worker: usize) {
        self.0.iter().for_each(|r| r.case_started(case_name, worker));
    }

    fn step_finished(&self, case_name: &str, step: &StepResult) {
        self.0.iter().for_each(|r| r.step_finished(case_name, step));
    }

    fn step_aborted(&self, case_name: &str, step: &StepResult) {
        self.0.iter().for_each(|r| r.step_aborted(case_name, step));
    }

    fn case_finished(&self, result: &CaseResult) {
        self.0.iter().for_each(|r| r.case_finished(result));
    }

    fn run_finished(&self, report: &RunReport, timeline: &ExecutionTimeline) {
        self.0.iter().for_each(|r| r.run_finished(report, timeline));
    }
}

fn colored_label(status: StepStatus) -> colored::ColoredString {
    let label = status.label();
    match status {
        StepStatus::Pass => label.green(),
        StepStatus::Fail => label.red().bold(),
        StepStatus::Broken => label.yellow(),
        StepStatus::Skipped | StepStatus::NotRun => label.dimmed(),
    }
}

/// Logs progress and prints the final summary to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter {
    /// Also print the per-worker timeline chart
    pub show_timeline: bool,
}

impl ConsoleReporter {
    pub fn new(show_timeline: bool) -> Self {
        Self { show_timeline }
    }
}

impl Reporter for ConsoleReporter {
    fn run_started(&self, total: usize) {
        info!("Running {} test cases", total);
    }

    fn case_started(&self, case_name: &str, worker: usize) {
        info!("[w{}] Starting case: {}", worker, case_name);
    }

    fn step_finished(&self, case_name: &str, step: &StepResult) {
        let line = format!(
            "{} step {} {}.{}",
            case_name, step.order, step.test_object, step.action
        );
        match step.status {
            StepStatus::Fail => error!("{} failed: {}", line, step.log.last().map(String::as_str).unwrap_or("")),
            StepStatus::Broken => warn!("{} is a known issue", line),
            _ => log::debug!("{}: {}", line, step.status.label()),
        }
    }

    fn step_aborted(&self, case_name: &str, step: &StepResult) {
        log::debug!("{} step {} aborted", case_name, step.order);
    }

    fn case_finished(&self, result: &CaseResult) {
        let duration = result
            .duration_ms()
            .map(|ms| format!(" ({} ms)", ms))
            .unwrap_or_default();
        println!("{:>8}  {}{}", colored_label(result.status), result.name, duration);
    }

    fn run_finished(&self, report: &RunReport, timeline: &ExecutionTimeline) {
        let summary = &report.summary;

        if self.show_timeline {
            println!("{}", timeline.gantt_chart());
        }

        println!();
        println!(
            "{} cases: {} passed, {} failed, {} broken, {} skipped, {} not run",
            summary.total,
            summary.passed.to_string().green(),
            summary.failed.to_string().red(),
            summary.broken.to_string().yellow(),
            summary.skipped,
            summary.not_run
        );

        for case in report.cases.iter().filter(|c| !c.passed()) {
            println!(
                "  {} {}: {}",
                colored_label(case.status),
                case.name,
                case.failure.as_deref().unwrap_or("")
            );
        }

        let elapsed = report.finished_at - report.started_at;
        println!("Total execution time: {:.2}s", elapsed.num_milliseconds() as f64 / 1000.0);
    }
}

/// Writes the run report as pretty JSON once the run finishes.
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    path: PathBuf,
}

impl JsonReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, report: &RunReport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&self.path, json).map_err(|e| EngineError::io(&self.path, e))?;
        info!("Wrote results to {}", self.path.display());
        Ok(())
    }
}

impl Reporter for JsonReportWriter {
    fn run_finished(&self, report: &RunReport, _timeline: &ExecutionTimeline) {
        if let Err(e) = self.write(report) {
            error!("Failed to write results file: {}", e);
        }
    }
}

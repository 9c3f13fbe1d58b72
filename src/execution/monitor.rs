//! Execution Monitor
//!
//! [`ExecutionContext`] is the state of one worker: which case and step it
//! is on, whether the case was stopped, and the live session. It is owned
//! by the worker and passed down explicitly; nothing is shared.
//!
//! [`ExecutionMonitor`] is shared by all workers. It forwards events to the
//! reporter, records retry points and keeps the run counters and timeline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use super::session::{Session, SessionSnapshot};
use super::state::{RetryPoint, RetryStore};
use crate::report::{CaseResult, EventType, ExecutionTimeline, Reporter, RunReport, StepResult, StepStatus};

/// Per-worker execution state.
pub struct ExecutionContext {
    worker: usize,
    current_case: Option<String>,
    current_step: Option<usize>,
    stopped: bool,

    /// Live driver session of the current case
    pub session: Option<Box<dyn Session>>,

    /// Snapshot restored when the current case resumes from a retry point
    pub snapshot: Option<SessionSnapshot>,
}

impl ExecutionContext {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            current_case: None,
            current_step: None,
            stopped: false,
            session: None,
            snapshot: None,
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn current_case(&self) -> Option<&str> {
        self.current_case.as_deref()
    }

    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    pub fn set_current_step(&mut self, order: usize) {
        self.current_step = Some(order);
    }

    /// Assigns a case to the worker and resets per-case state.
    ///
    /// Returns the previous case if it never finished.
    pub fn assign_case(&mut self, case_name: &str) -> Option<String> {
        let unfinished = self.current_case.replace(case_name.to_string());
        self.current_step = None;
        self.stopped = false;
        self.snapshot = None;
        unfinished
    }

    /// Marks the current case as finished.
    pub fn finish_case(&mut self) {
        self.current_case = None;
        self.current_step = None;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn raise_stop(&mut self) {
        self.stopped = true;
    }

    pub fn has_live_session(&self) -> bool {
        self.session.as_ref().map(|s| s.is_open()).unwrap_or(false)
    }

    /// Closes and drops the session, if any.
    pub fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("[w{}] Closing session {}", self.worker, session.id());
            session.close();
        }
    }
}

/// Shared run bookkeeping.
pub struct ExecutionMonitor {
    reporter: Arc<dyn Reporter>,
    retry: Option<RetryStore>,
    total: AtomicUsize,
    completed: AtomicUsize,
    run_started: AtomicBool,
    run_finished: AtomicBool,
    timeline: Mutex<ExecutionTimeline>,
}

impl ExecutionMonitor {
    /// `retry` is `Some` when retry-on-error is enabled.
    pub fn new(reporter: Arc<dyn Reporter>, retry: Option<RetryStore>) -> Self {
        Self {
            reporter,
            retry,
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            run_started: AtomicBool::new(false),
            run_finished: AtomicBool::new(false),
            timeline: Mutex::new(ExecutionTimeline::new()),
        }
    }

    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }

    /// Announces the run; only the first call reaches the reporter.
    pub fn run_started(&self, total: usize) {
        if self.run_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.total.store(total, Ordering::SeqCst);
        if let Ok(mut timeline) = self.timeline.lock() {
            *timeline = ExecutionTimeline::new();
        }
        self.reporter.run_started(total);
    }

    pub fn case_started(&self, ctx: &ExecutionContext, case_name: &str) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.add_event(case_name, ctx.worker(), EventType::Started);
        }
        self.reporter.case_started(case_name, ctx.worker());
    }

    /// Processes a finished step.
    ///
    /// A FAIL records the retry point and, with `stop_on_error`, stops the
    /// rest of the case on this worker.
    pub fn step_finished(
        &self,
        ctx: &mut ExecutionContext,
        case_id: &str,
        step: &StepResult,
        stop_on_error: bool,
    ) {
        if step.status == StepStatus::Fail {
            if let Some(store) = &self.retry {
                let snapshot = ctx
                    .session
                    .as_ref()
                    .map(|s| s.snapshot())
                    .unwrap_or_default();
                if let Err(e) = store.save(&RetryPoint::new(case_id, step.order, snapshot)) {
                    warn!("Could not save retry point for '{}': {}", case_id, e);
                }
            }
            if stop_on_error {
                debug!("[w{}] Stopping '{}' after step {}", ctx.worker(), case_id, step.order);
                ctx.raise_stop();
            }
        }

        if step.status == StepStatus::Skipped && step.no_run && ctx.is_stopped() {
            self.reporter.step_aborted(case_id, step);
        } else {
            self.reporter.step_finished(case_id, step);
        }
    }

    /// Processes a finished case. A case without failure clears its retry
    /// point.
    pub fn case_finished(&self, ctx: &ExecutionContext, result: &CaseResult) {
        if result.passed() {
            if let Some(store) = &self.retry {
                if let Err(e) = store.clear(&result.name) {
                    warn!("Could not clear retry point for '{}': {}", result.name, e);
                }
            }
        }

        let event = if result.passed() {
            EventType::Completed
        } else {
            EventType::Failed
        };
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.add_event(result.name.as_str(), ctx.worker(), event);
        }

        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Completed {}/{} cases",
            done,
            self.total.load(Ordering::SeqCst)
        );
        self.reporter.case_finished(result);
    }

    /// Announces the end of the run; only the first call reaches the reporter.
    pub fn run_finished(&self, report: &RunReport) {
        if self.run_finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let timeline = self.timeline();
        self.reporter.run_finished(report, &timeline);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Copy of the timeline so far.
    pub fn timeline(&self) -> ExecutionTimeline {
        self.timeline
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

//! Case Unit
//!
//! One concrete case: a definition bound to one data row. A case unit runs
//! its steps strictly in order on the worker that owns it, wrapped in the
//! `before_case` / `after_case` lifecycle:
//!
//! - before: session setup, the once-per-run hook, retry snapshot restore,
//!   start URL, recording
//! - after: the after-case hook, recording attachment, feedback, session
//!   teardown and the test object cache

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;

use super::monitor::{ExecutionContext, ExecutionMonitor};
use super::registry::{invoke_contained, panic_message, ActionContext, ActionRegistry, ObjectCache};
use super::session::{ArtifactCapture, SessionFactory, SessionOptions};
use super::state::RetryPoint;
use super::step::{StepScope, StepUnit};
use crate::config::RunConfig;
use crate::data::DataResolver;
use crate::definition::{CaseDefinition, SeriesNumber};
use crate::error::EngineError;
use crate::report::{CaseResult, FeedbackConnector, StepStatus};

/// Collaborators shared by every case of a run.
pub struct CaseServices {
    pub config: Arc<RunConfig>,
    pub registry: Arc<ActionRegistry>,
    pub monitor: Arc<ExecutionMonitor>,
    pub sessions: Arc<dyn SessionFactory>,
    pub capture: Arc<dyn ArtifactCapture>,
    pub feedback: Vec<Arc<dyn FeedbackConnector>>,

    /// Outcome of the before-run hook, computed by the first case
    pub before_run: OnceCell<Result<(), String>>,
}

/// A runnable case: definition, data row and bound steps.
#[derive(Debug, Clone)]
pub struct CaseUnit {
    name: String,
    definition: Arc<CaseDefinition>,
    resolver: Arc<DataResolver>,
    row_index: usize,
    external_id: Option<String>,
    series: Option<SeriesNumber>,
    steps: Vec<StepUnit>,
    retry: Option<RetryPoint>,
    replay_until: Option<usize>,
}

impl CaseUnit {
    pub fn new(
        name: impl Into<String>,
        definition: Arc<CaseDefinition>,
        resolver: Arc<DataResolver>,
        row_index: usize,
        steps: Vec<StepUnit>,
    ) -> Self {
        Self {
            name: name.into(),
            definition,
            resolver,
            row_index,
            external_id: None,
            series: None,
            steps,
            retry: None,
            replay_until: None,
        }
    }

    pub fn with_external_id(mut self, id: Option<String>) -> Self {
        self.external_id = id;
        self
    }

    pub fn with_series(mut self, series: Option<SeriesNumber>) -> Self {
        self.series = series;
        self
    }

    /// Resumes this case from a retry point, replaying steps up to the
    /// failed step plus `over_steps` as no-run.
    pub fn resume_from(&mut self, point: RetryPoint, over_steps: u32) {
        self.replay_until = Some(point.replay_until(over_steps));
        self.retry = Some(point);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &CaseDefinition {
        &self.definition
    }

    pub fn row_index(&self) -> usize {
        self.row_index
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn series(&self) -> Option<&SeriesNumber> {
        self.series.as_ref()
    }

    pub fn steps(&self) -> &[StepUnit] {
        &self.steps
    }

    pub fn replay_until(&self) -> Option<usize> {
        self.replay_until
    }

    /// Runs the whole case on the calling worker.
    ///
    /// `after_case` runs exactly once, even when setup or a step panics.
    pub fn run(&self, ctx: &mut ExecutionContext, services: &CaseServices) -> CaseResult {
        if let Some(previous) = ctx.assign_case(&self.name) {
            warn!(
                "[w{}] Case '{}' did not finish - completing it first",
                ctx.worker(),
                previous
            );
            Self::abandon(&previous, ctx, services);
        }

        let mut result = CaseResult::new(self.name.as_str(), self.definition.case_type.as_str());
        result.external_id = self.external_id.clone();
        result.worker = ctx.worker();
        result.started_at = Some(Utc::now());
        services.monitor.case_started(ctx, &self.name);

        let mut objects = ObjectCache::new(Arc::clone(&services.registry));

        let body = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_body(ctx, services, &mut objects, &mut result)
        }));
        if let Err(payload) = body {
            let reason = panic_message(payload.as_ref());
            error!("[w{}] Case '{}' panicked: {}", ctx.worker(), self.name, reason);
            result.fail(format!("Case aborted: {}", reason));
        }

        self.after_case(ctx, services, &mut objects, &mut result);
        result.finished_at = Some(Utc::now());
        services.monitor.case_finished(ctx, &result);
        result
    }

    fn run_body(
        &self,
        ctx: &mut ExecutionContext,
        services: &CaseServices,
        objects: &mut ObjectCache,
        result: &mut CaseResult,
    ) {
        match self.before_case(ctx, services, objects) {
            Ok(replay_until) => {
                let mut scope = StepScope {
                    case_name: &self.name,
                    ctx: &mut *ctx,
                    monitor: services.monitor.as_ref(),
                    objects,
                    resolver: self.resolver.as_ref(),
                    row_index: self.row_index,
                    config: services.config.as_ref(),
                    capture: services.capture.as_ref(),
                    replay_until,
                };
                for step in &self.steps {
                    step.run(&mut scope, result);
                }
            }
            Err(reason) => {
                warn!("Setup of '{}' failed: {}", self.name, reason);
                result.fail(format!("Case setup failed: {}", reason));
                for step in &self.steps {
                    result.record(step.skip(StepStatus::Skipped, "Skipped: case setup failed"));
                }
            }
        }
    }

    /// Completes a case the worker left without finishing: after-case
    /// hook, recording and session.
    fn abandon(case_name: &str, ctx: &mut ExecutionContext, services: &CaseServices) {
        let mut objects = ObjectCache::new(Arc::clone(&services.registry));
        if let Some(hook) = &services.config.hooks.after_case {
            if let Err(e) = invoke_hook(case_name, hook, ctx, &mut objects) {
                warn!("After-case hook for '{}' failed: {}", case_name, e);
            }
        }
        services.capture.stop_recording(case_name);
        ctx.close_session();
    }

    /// Prepares the worker for this case. Returns the effective replay
    /// window.
    fn before_case(
        &self,
        ctx: &mut ExecutionContext,
        services: &CaseServices,
        objects: &mut ObjectCache,
    ) -> Result<Option<usize>, String> {
        let config = services.config.as_ref();

        if config.keep_session && ctx.has_live_session() {
            debug!("[w{}] Reusing kept session for '{}'", ctx.worker(), self.name);
        } else {
            ctx.close_session();
            let mut options = SessionOptions::new(self.definition.case_type.as_str());
            if self.definition.headless == Some(false) {
                options.headless = false;
            }
            let session = services
                .sessions
                .open(&options)
                .map_err(|e| format!("Could not open session: {}", e))?;
            ctx.session = Some(session);
        }

        if let Some(hook) = &config.hooks.before_run {
            services
                .before_run
                .get_or_init(|| {
                    info!("Running before-run hook {}", hook);
                    invoke_hook(&self.name, hook, ctx, objects)
                })
                .clone()?;
        }

        let mut replay_until = self.replay_until;
        if let Some(point) = &self.retry {
            ctx.snapshot = Some(point.snapshot.clone());
            let restored = match ctx.session.as_mut() {
                Some(session) => session.restore(&point.snapshot).map_err(|e| e.0),
                None => Err("no session".to_string()),
            };
            match restored {
                Ok(()) => info!(
                    "Resuming '{}' after step {}",
                    self.name,
                    replay_until.unwrap_or(0)
                ),
                Err(reason) => {
                    let err = EngineError::SessionRestoreFailed {
                        case: self.name.clone(),
                        reason,
                    };
                    warn!("{} - running all steps", err);
                    replay_until = None;
                }
            }
        }

        if let Some(url) = &self.definition.start_url {
            if replay_until.is_none() {
                ctx.session
                    .as_mut()
                    .ok_or_else(|| "No session to open the start URL in".to_string())?
                    .navigate(url)
                    .map_err(|e| format!("Could not open start URL: {}", e))?;
            }
        }

        services
            .capture
            .start_recording(ctx.session.as_deref(), &self.name);
        Ok(replay_until)
    }

    fn after_case(
        &self,
        ctx: &mut ExecutionContext,
        services: &CaseServices,
        objects: &mut ObjectCache,
        result: &mut CaseResult,
    ) {
        let config = services.config.as_ref();

        if let Some(hook) = &config.hooks.after_case {
            if let Err(e) = invoke_hook(&self.name, hook, ctx, objects) {
                warn!("After-case hook for '{}' failed: {}", self.name, e);
            }
        }

        if let Some(recording) = services.capture.stop_recording(&self.name) {
            result.attachments.push(recording);
        }

        if config.feedback {
            if let Some(id) = &self.external_id {
                for connector in &services.feedback {
                    if let Err(e) = connector.publish(id, result) {
                        warn!(
                            "Feedback to {} for '{}' ({}) failed: {}",
                            connector.name(),
                            self.name,
                            id,
                            e
                        );
                    }
                }
            }
        }

        if !config.keep_session || !result.passed() {
            ctx.close_session();
        }
        objects.clear();
        ctx.finish_case();
    }
}

/// Invokes an `object.action` hook without parameters.
fn invoke_hook(
    case_name: &str,
    hook: &str,
    ctx: &mut ExecutionContext,
    objects: &mut ObjectCache,
) -> Result<(), String> {
    let (object, action) = hook
        .split_once('.')
        .ok_or_else(|| format!("Hook '{}' is not of the form object.action", hook))?;
    let instance = objects.get(object).map_err(|e| e.to_string())?;

    let mut action_ctx = ActionContext::new(case_name, &mut ctx.session);
    let outcome = invoke_contained(&mut **instance, action, &mut action_ctx, &[]);
    for line in action_ctx.into_log() {
        debug!("[{}] {}", hook, line);
    }
    outcome.map_err(|e| format!("Hook {} failed: {}", hook, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::GlobalData;
    use crate::definition::StepDefinition;
    use crate::execution::registry::{ParamShape, TestObjectBuilder};
    use crate::execution::session::{
        MemorySession, MemorySessionFactory, NoCapture, Session, SessionError, SessionFactory,
        SessionSnapshot,
    };
    use crate::report::{Reporters, StepStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Published(Mutex<Vec<String>>);

    impl FeedbackConnector for Published {
        fn name(&self) -> &str {
            "memory"
        }

        fn publish(&self, external_id: &str, result: &CaseResult) -> Result<(), String> {
            self.0
                .lock()
                .unwrap()
                .push(format!("{} {}", external_id, result.status.label()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingFactory(Mutex<Vec<SessionOptions>>);

    impl SessionFactory for RecordingFactory {
        fn open(&self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError> {
            self.0.lock().unwrap().push(options.clone());
            Ok(Box::new(MemorySession::new("recorded", options.headless)))
        }
    }

    struct BrokenRecorder;

    impl ArtifactCapture for BrokenRecorder {
        fn screenshot(&self, _: Option<&dyn Session>, _: &str, _: usize) -> Option<String> {
            None
        }

        fn start_recording(&self, _: Option<&dyn Session>, _: &str) {
            panic!("recorder offline");
        }
    }

    fn services(config: RunConfig, hook_calls: Arc<AtomicUsize>) -> (CaseServices, Arc<MemorySessionFactory>) {
        let mut registry = ActionRegistry::with_builtins();
        registry.register(
            TestObjectBuilder::new("suite", || ())
                .action("prepare", ParamShape::Fixed(0), move |_, _, _| {
                    hook_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .action("explode", ParamShape::Fixed(0), |_, _, _| panic!("driver crashed"))
                .build(),
        );
        let factory = Arc::new(MemorySessionFactory::new());
        let services = CaseServices {
            config: Arc::new(config),
            registry: Arc::new(registry),
            monitor: Arc::new(ExecutionMonitor::new(Arc::new(Reporters::new()), None)),
            sessions: factory.clone(),
            capture: Arc::new(NoCapture),
            feedback: Vec::new(),
            before_run: OnceCell::new(),
        };
        (services, factory)
    }

    fn unit(definition: CaseDefinition, registry: &ActionRegistry) -> CaseUnit {
        let steps = definition
            .steps
            .iter()
            .enumerate()
            .map(|(index, def)| {
                let info = registry.public_action(&def.test_object, &def.name).unwrap();
                StepUnit::new(index + 1, def.clone(), info)
            })
            .collect();
        let resolver = DataResolver::new(Arc::new(GlobalData::empty()))
            .with_document(serde_json::json!({"url": "https://shop.test/home", "a": "1", "b": "2"}));
        CaseUnit::new(
            definition.name.clone(),
            Arc::new(definition),
            Arc::new(resolver),
            0,
            steps,
        )
    }

    fn passing_case(name: &str) -> CaseDefinition {
        CaseDefinition::new(
            name,
            vec![StepDefinition::new("core", "assertEquals").with_using("a, a")],
        )
    }

    #[test]
    fn test_case_runs_and_closes_session() {
        let (services, factory) = services(RunConfig::default(), Arc::new(AtomicUsize::new(0)));
        let case = unit(
            passing_case("login").with_start_url("https://shop.test/"),
            &services.registry,
        );
        let mut ctx = ExecutionContext::new(1);

        let result = case.run(&mut ctx, &services);

        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(result.worker, 1);
        assert!(result.started_at.is_some() && result.finished_at.is_some());
        assert_eq!(factory.opened(), 1);
        assert!(ctx.session.is_none());
        assert!(ctx.current_case().is_none());
    }

    #[test]
    fn test_before_run_hook_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = RunConfig::default();
        config.hooks.before_run = Some("suite.prepare".into());
        let (services, _) = services(config, Arc::clone(&calls));
        let mut ctx = ExecutionContext::new(0);

        for name in ["one", "two", "three"] {
            let case = unit(passing_case(name), &services.registry);
            assert!(case.run(&mut ctx, &services).passed());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_setup_failure_skips_all_steps() {
        let (services, _) = services(RunConfig::default(), Arc::new(AtomicUsize::new(0)));
        let case = unit(
            passing_case("login").with_start_url("not-a-url"),
            &services.registry,
        );
        let mut ctx = ExecutionContext::new(0);

        let result = case.run(&mut ctx, &services);

        assert_eq!(result.status, StepStatus::Fail);
        assert!(result.failure.as_deref().unwrap().contains("start URL"));
        assert!(result
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Skipped && s.no_run));
    }

    #[test]
    fn test_keep_session_between_passing_cases() {
        let mut config = RunConfig::default();
        config.keep_session = true;
        let (services, factory) = services(config, Arc::new(AtomicUsize::new(0)));
        let mut ctx = ExecutionContext::new(0);

        unit(passing_case("one"), &services.registry).run(&mut ctx, &services);
        unit(passing_case("two"), &services.registry).run(&mut ctx, &services);
        assert_eq!(factory.opened(), 1);
        assert!(ctx.has_live_session());

        let failing = CaseDefinition::new("three", vec![StepDefinition::new("core", "fail")]);
        unit(failing, &services.registry).run(&mut ctx, &services);
        assert!(ctx.session.is_none());
    }

    #[test]
    fn test_resume_restores_snapshot_and_replays() {
        let (services, _) = services(RunConfig::default(), Arc::new(AtomicUsize::new(0)));
        let definition = CaseDefinition::new(
            "checkout",
            vec![
                StepDefinition::new("core", "fail"),
                StepDefinition::new("core", "assertCookie").with_using("[a, b]"),
                StepDefinition::new("core", "assertUrl").with_using("url"),
            ],
        );
        let mut case = unit(definition, &services.registry);

        let mut snapshot = SessionSnapshot::default();
        snapshot.cookies.insert("1".into(), "2".into());
        snapshot.url = Some("https://shop.test/home".into());
        case.resume_from(RetryPoint::new("checkout", 1, snapshot), 0);

        let mut ctx = ExecutionContext::new(0);
        let result = case.run(&mut ctx, &services);

        assert_eq!(result.steps[0].status, StepStatus::NotRun);
        assert!(result.steps[0].no_run);
        assert_eq!(result.steps[1].status, StepStatus::Pass);
        assert_eq!(result.steps[2].status, StepStatus::Pass);
        assert_eq!(result.status, StepStatus::Pass);
    }

    #[test]
    fn test_failed_restore_runs_everything_live() {
        let (services, _) = services(RunConfig::default(), Arc::new(AtomicUsize::new(0)));
        let mut case = unit(passing_case("login"), &services.registry);
        let snapshot = SessionSnapshot {
            url: Some("broken".into()),
            ..Default::default()
        };
        case.resume_from(RetryPoint::new("login", 1, snapshot), 0);

        let mut ctx = ExecutionContext::new(0);
        let result = case.run(&mut ctx, &services);

        assert_eq!(result.steps[0].status, StepStatus::Pass);
        assert!(!result.steps[0].no_run);
    }

    #[test]
    fn test_feedback_published_with_external_id() {
        let mut config = RunConfig::default();
        config.feedback = true;
        let (mut services, _) = services(config, Arc::new(AtomicUsize::new(0)));
        let published = Arc::new(Published(Mutex::new(Vec::new())));
        services.feedback.push(published.clone());

        let case = unit(passing_case("login"), &services.registry)
            .with_external_id(Some("TC-1".into()));
        let mut ctx = ExecutionContext::new(0);
        case.run(&mut ctx, &services);

        let without_id = unit(passing_case("search"), &services.registry);
        without_id.run(&mut ctx, &services);

        assert_eq!(*published.0.lock().unwrap(), vec!["TC-1 PASS"]);
    }

    #[test]
    fn test_after_case_hook_runs_per_case() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = RunConfig::default();
        config.hooks.after_case = Some("suite.prepare".into());
        let (services, _) = services(config, Arc::clone(&calls));
        let mut ctx = ExecutionContext::new(0);

        for name in ["one", "two", "three"] {
            unit(passing_case(name), &services.registry).run(&mut ctx, &services);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_non_headless_option_reaches_factory() {
        let (mut services, _) = services(RunConfig::default(), Arc::new(AtomicUsize::new(0)));
        let factory = Arc::new(RecordingFactory::default());
        services.sessions = Arc::clone(&factory) as Arc<dyn SessionFactory>;
        let mut ctx = ExecutionContext::new(0);

        let mut visible = passing_case("visible");
        visible.headless = Some(false);
        unit(visible, &services.registry).run(&mut ctx, &services);
        unit(passing_case("hidden"), &services.registry).run(&mut ctx, &services);

        let opened = factory.0.lock().unwrap().clone();
        assert_eq!(opened.len(), 2);
        assert!(!opened[0].headless);
        assert_eq!(opened[0].case_type, "web");
        assert!(opened[1].headless);
    }

    #[test]
    fn test_panicking_step_still_completes_case() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = RunConfig::default();
        config.hooks.after_case = Some("suite.prepare".into());
        let (services, _) = services(config, Arc::clone(&calls));
        let mut ctx = ExecutionContext::new(0);

        let crashing = CaseDefinition::new(
            "crashing",
            vec![
                StepDefinition::new("suite", "explode"),
                StepDefinition::new("core", "log"),
            ],
        );
        let result = unit(crashing, &services.registry).run(&mut ctx, &services);
        let next = unit(passing_case("next"), &services.registry).run(&mut ctx, &services);

        assert_eq!(result.status, StepStatus::Fail);
        assert!(result.steps[0].log.iter().any(|l| l.contains("driver crashed")));
        assert_eq!(result.steps[1].status, StepStatus::Skipped);
        assert!(next.passed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(ctx.current_case().is_none());
    }

    #[test]
    fn test_panicking_setup_still_runs_after_case() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = RunConfig::default();
        config.hooks.after_case = Some("suite.prepare".into());
        let (mut services, _) = services(config, Arc::clone(&calls));
        services.capture = Arc::new(BrokenRecorder) as Arc<dyn ArtifactCapture>;
        let mut ctx = ExecutionContext::new(0);

        let result = unit(passing_case("login"), &services.registry).run(&mut ctx, &services);

        assert_eq!(result.status, StepStatus::Fail);
        assert!(result.failure.as_deref().unwrap().contains("recorder offline"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ctx.session.is_none());
        assert!(ctx.current_case().is_none());
    }

    #[test]
    fn test_unfinished_case_completed_on_reassign() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = RunConfig::default();
        config.hooks.after_case = Some("suite.prepare".into());
        let (services, _) = services(config, Arc::clone(&calls));
        let mut ctx = ExecutionContext::new(0);

        ctx.assign_case("orphan");
        ctx.session = Some(Box::new(MemorySession::new("left-over", true)));
        unit(passing_case("login"), &services.registry).run(&mut ctx, &services);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(ctx.session.is_none());
    }
}

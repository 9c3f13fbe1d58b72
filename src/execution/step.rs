//! Individual Step Execution
//!
//! A [`StepUnit`] is one ordered action invocation of a case. Running it:
//!
//! 1. Skips it when the case was stopped or it lies in the retry window
//! 2. Binds its parameters from the case's test data
//! 3. Invokes the action on the case's test object instance
//! 4. Maps the outcome to a status and applies the screenshot, undo and
//!    stop policies
//!
//! The result is written once and appended to the case result.

use chrono::Utc;
use log::debug;
use serde_json::Value;

use super::monitor::{ExecutionContext, ExecutionMonitor};
use super::registry::{invoke_contained, ActionContext, ActionInfo, FailureKind, ObjectCache, ParamShape};
use super::session::ArtifactCapture;
use crate::config::{RunConfig, ScreenshotPolicy};
use crate::data::DataResolver;
use crate::definition::{StepDefinition, Using};
use crate::error::{EngineError, Result};
use crate::report::{CaseResult, StepResult, StepStatus};

/// Everything a step needs from its case and worker.
pub struct StepScope<'a> {
    pub case_name: &'a str,
    pub ctx: &'a mut ExecutionContext,
    pub monitor: &'a ExecutionMonitor,
    pub objects: &'a mut ObjectCache,
    pub resolver: &'a DataResolver,
    pub row_index: usize,
    pub config: &'a RunConfig,
    pub capture: &'a dyn ArtifactCapture,

    /// Steps up to this order are replayed as no-run
    pub replay_until: Option<usize>,
}

/// One step of a case unit.
#[derive(Debug, Clone)]
pub struct StepUnit {
    order: usize,
    definition: StepDefinition,
    action: ActionInfo,
}

impl StepUnit {
    /// Binds a step to its registered action.
    pub fn new(order: usize, definition: StepDefinition, action: ActionInfo) -> Self {
        Self {
            order,
            definition,
            action,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    fn new_result(&self) -> StepResult {
        let mut result =
            StepResult::new(self.order, &self.definition.test_object, &self.definition.name);
        result.comment = self.definition.comment.clone();
        result
    }

    /// Records the step as never invoked.
    pub fn skip(&self, status: StepStatus, reason: &str) -> StepResult {
        let mut result = self.new_result();
        result.mark_no_run(status, reason);
        result
    }

    /// Runs the step and appends its result to `case_result`.
    pub fn run(&self, scope: &mut StepScope<'_>, case_result: &mut CaseResult) {
        let def = &self.definition;
        let stop_on_error = def.stop_on_error.unwrap_or(scope.config.stop_on_error);
        scope.ctx.set_current_step(self.order);

        if scope.ctx.is_stopped() {
            let result = self.skip(StepStatus::Skipped, "Skipped: case stopped by an earlier failure");
            self.finish(scope, case_result, result, false);
            return;
        }

        if scope.replay_until.map_or(false, |last| self.order <= last) {
            let result = self.skip(StepStatus::NotRun, "Not run: verified by a previous attempt");
            self.finish(scope, case_result, result, false);
            return;
        }

        let mut result = self.new_result();
        result.started_at = Some(Utc::now());

        let args = match self.arguments(scope.resolver, scope.row_index) {
            Ok(args) => Some(args),
            Err(e) => {
                result.status = StepStatus::Fail;
                result.log(format!("Parameter binding failed: {}", e));
                None
            }
        };

        if let Some(args) = &args {
            self.invoke(scope, args, &mut result);
        }

        if self.wants_screenshot(result.status, &scope.config.screenshots) {
            result.artifact =
                scope
                    .capture
                    .screenshot(scope.ctx.session.as_deref(), scope.case_name, self.order);
        }

        if result.status == StepStatus::Fail {
            if let (Some(undo), Some(args)) = (&def.undo, &args) {
                self.undo(scope, undo, args, &mut result);
            }
        }

        result.finished_at = Some(Utc::now());
        self.finish(scope, case_result, result, stop_on_error);
    }

    fn finish(
        &self,
        scope: &mut StepScope<'_>,
        case_result: &mut CaseResult,
        result: StepResult,
        stop_on_error: bool,
    ) {
        scope
            .monitor
            .step_finished(scope.ctx, scope.case_name, &result, stop_on_error);
        case_result.record(result);
    }

    fn invoke(&self, scope: &mut StepScope<'_>, args: &[Value], result: &mut StepResult) {
        let def = &self.definition;

        if !self.action.shape.accepts(args.len()) {
            result.status = StepStatus::Fail;
            result.log(format!(
                "{}.{} expects {} parameters, got {}",
                def.test_object,
                def.name,
                shape_text(self.action.shape),
                args.len()
            ));
            return;
        }

        let object = match scope.objects.get(&def.test_object) {
            Ok(object) => object,
            Err(e) => {
                result.status = StepStatus::Fail;
                result.log(e.to_string());
                return;
            }
        };

        let mut action_ctx = ActionContext::new(scope.case_name, &mut scope.ctx.session);
        let outcome = invoke_contained(&mut **object, &def.name, &mut action_ctx, args);
        result.log.extend(action_ctx.into_log());

        result.status = match outcome {
            Ok(()) => StepStatus::Pass,
            Err(e) => {
                result.log(e.to_string());
                match e.kind {
                    FailureKind::KnownIssue => StepStatus::Broken,
                    FailureKind::Hard if def.skip_on_error => StepStatus::Skipped,
                    FailureKind::Hard => StepStatus::Fail,
                }
            }
        };
        debug!(
            "{} step {} {}.{}: {}",
            scope.case_name,
            self.order,
            def.test_object,
            def.name,
            result.status.label()
        );
    }

    /// Best-effort undo; never changes the step status.
    fn undo(&self, scope: &mut StepScope<'_>, undo: &str, args: &[Value], result: &mut StepResult) {
        let object = match scope.objects.get(&self.definition.test_object) {
            Ok(object) => object,
            Err(e) => {
                result.log(format!("Undo '{}' failed: {}", undo, e));
                return;
            }
        };

        let mut action_ctx = ActionContext::new(scope.case_name, &mut scope.ctx.session);
        let outcome = invoke_contained(&mut **object, undo, &mut action_ctx, args);
        result.log.extend(action_ctx.into_log());

        match outcome {
            Ok(()) => result.log(format!("Undo '{}' done", undo)),
            Err(e) => result.log(format!("Undo '{}' failed: {}", undo, e)),
        }
    }

    /// Binds parameters from the `using` declaration.
    pub fn arguments(&self, resolver: &DataResolver, row_index: usize) -> Result<Vec<Value>> {
        match self.definition.binding() {
            Using::Nothing => Ok(Vec::new()),
            Using::WholeRow => Ok(vec![resolver.whole_row(row_index)?]),
            Using::Keys(keys) if keys.len() == 1 => {
                match (resolver.resolve(&keys[0], row_index)?, self.action.shape) {
                    (Value::Array(items), ParamShape::Variadic) => Ok(items),
                    (value, _) => Ok(vec![value]),
                }
            }
            Using::Keys(keys) => keys
                .iter()
                .map(|key| resolver.resolve(key, row_index))
                .collect::<std::result::Result<Vec<_>, EngineError>>(),
        }
    }

    /// Screenshot precedence: global on success, global on failure, then
    /// the step's own `takeScreenshot: true`.
    pub fn wants_screenshot(&self, status: StepStatus, policy: &ScreenshotPolicy) -> bool {
        if policy.on_success && status == StepStatus::Pass {
            return true;
        }
        if policy.on_failure && status.is_failure() {
            return true;
        }
        self.definition.take_screenshot == Some(true)
    }
}

fn shape_text(shape: ParamShape) -> String {
    match shape {
        ParamShape::Fixed(n) => n.to_string(),
        ParamShape::Variadic => "any number of".to_string(),
    }
}

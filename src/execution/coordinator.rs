//! Run Coordinator
//!
//! Loads case definitions, filters and expands them into case units, and
//! dispatches those units sequentially or over a fixed pool of worker
//! threads.
//!
//! Cases that share a series root run as one batch, in series order, on a
//! single worker. Every other case is its own batch. Workers pull batches
//! from a shared job channel and send case results back over an mpsc
//! channel.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::Utc;
use log::{debug, error, info};
use once_cell::sync::OnceCell;

use super::case::{CaseServices, CaseUnit};
use super::monitor::{ExecutionContext, ExecutionMonitor};
use super::registry::ActionRegistry;
use super::session::{ArtifactCapture, MemorySessionFactory, NoCapture, SessionFactory};
use super::state::RetryStore;
use super::step::StepUnit;
use crate::config::RunConfig;
use crate::data::{DataResolver, GlobalData};
use crate::definition::{load_case_definitions, row_selected, CaseDefinition, SeriesNumber, TagFilter};
use crate::error::{EngineError, Result};
use crate::report::{CaseResult, FeedbackConnector, JsonReportWriter, Reporter, Reporters, RunReport};

/// External id value that always drops a data row.
pub const DROP_MARKER: &str = "-";

/// Orchestrates a whole run.
///
/// # Example
///
/// ```rust,no_run
/// use caserunner::config::RunConfig;
/// use caserunner::execution::{ActionRegistry, RunCoordinator};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut config = RunConfig::default();
///     config.workers = 4;
///
///     let coordinator = RunCoordinator::new(config, ActionRegistry::with_builtins());
///     let report = coordinator.run(&["cases".into()])?;
///     println!("{} of {} passed", report.summary.passed, report.summary.total);
///     Ok(())
/// }
/// ```
pub struct RunCoordinator {
    config: Arc<RunConfig>,
    registry: Arc<ActionRegistry>,
    sessions: Arc<dyn SessionFactory>,
    capture: Arc<dyn ArtifactCapture>,
    reporters: Reporters,
    feedback: Vec<Arc<dyn FeedbackConnector>>,
}

impl RunCoordinator {
    /// Creates a coordinator with in-memory sessions and no capture.
    pub fn new(config: RunConfig, registry: ActionRegistry) -> Self {
        let mut reporters = Reporters::new();
        if let Some(path) = &config.results_file {
            reporters.add(Arc::new(JsonReportWriter::new(path)));
        }

        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            sessions: Arc::new(MemorySessionFactory::new()),
            capture: Arc::new(NoCapture),
            reporters,
            feedback: Vec::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn set_session_factory(&mut self, sessions: Arc<dyn SessionFactory>) {
        self.sessions = sessions;
    }

    pub fn set_capture(&mut self, capture: Arc<dyn ArtifactCapture>) {
        self.capture = capture;
    }

    pub fn add_reporter(&mut self, reporter: Arc<dyn Reporter>) {
        self.reporters.add(reporter);
    }

    pub fn add_feedback(&mut self, connector: Arc<dyn FeedbackConnector>) {
        self.feedback.push(connector);
    }

    /// Loads, filters and runs everything under `paths`.
    pub fn run(&self, paths: &[PathBuf]) -> Result<RunReport> {
        let units = self.load_and_filter(paths)?;
        self.execute(units)
    }

    /// Loads definitions and turns the selected ones into case units.
    ///
    /// All structural problems (unknown actions, duplicate names or
    /// external ids, malformed series numbers, bad data) fail here, before
    /// any case runs.
    pub fn load_and_filter(&self, paths: &[PathBuf]) -> Result<Vec<CaseUnit>> {
        let config = self.config.as_ref();
        let definitions = load_case_definitions(paths)?;
        let global = Arc::new(GlobalData::discover(&config.data_root)?);
        let filter = TagFilter::new(&config.include_tags, &config.exclude_tags);

        let retry_points = if config.retry.enabled {
            RetryStore::new(&config.state_dir).load_all()?
        } else {
            HashMap::new()
        };

        let mut units = Vec::new();
        let mut names = HashSet::new();
        let mut external_ids: HashMap<String, String> = HashMap::new();

        for definition in definitions {
            if !filter.matches(&definition.meta) {
                debug!("Case '{}' filtered out by tags", definition.name);
                continue;
            }

            let steps = self.bind_steps(&definition)?;
            let series = definition
                .series_number
                .as_deref()
                .map(str::parse::<SeriesNumber>)
                .transpose()?;
            let resolver = Arc::new(DataResolver::load(
                &definition,
                &config.data_root,
                Arc::clone(&global),
                config.permissive_data,
            )?);
            let definition = Arc::new(definition);

            for (name, row_index, external_id) in self.expand(&definition, &resolver) {
                if !names.insert(name.clone()) {
                    return Err(EngineError::DuplicateCaseName(name));
                }
                if let Some(id) = &external_id {
                    if let Some(first) = external_ids.insert(id.clone(), name.clone()) {
                        return Err(EngineError::DuplicateExternalId {
                            id: id.clone(),
                            first,
                            second: name,
                        });
                    }
                }

                let mut unit = CaseUnit::new(
                    name,
                    Arc::clone(&definition),
                    Arc::clone(&resolver),
                    row_index,
                    steps.clone(),
                )
                .with_external_id(external_id)
                .with_series(series.clone());

                if let Some(point) = retry_points.get(unit.name()) {
                    info!(
                        "Case '{}' resumes after step {} (+{})",
                        unit.name(),
                        point.step_order,
                        config.retry.over_steps
                    );
                    unit.resume_from(point.clone(), config.retry.over_steps);
                }
                units.push(unit);
            }
        }

        if units.is_empty() {
            return Err(EngineError::NoCasesSelected);
        }

        units.sort_by(|a, b| match (a.series(), b.series()) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        info!("Selected {} test cases", units.len());
        Ok(units)
    }

    /// Binds each step to its registered action.
    fn bind_steps(&self, definition: &CaseDefinition) -> Result<Vec<StepUnit>> {
        definition
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let action = self.registry.public_action(&step.test_object, &step.name)?;
                if let Some(undo) = &step.undo {
                    self.registry.action(&step.test_object, undo)?;
                }
                Ok(StepUnit::new(index + 1, step.clone(), action))
            })
            .collect()
    }

    /// Concrete `(name, row index, external id)` units of a definition.
    fn expand(
        &self,
        definition: &CaseDefinition,
        resolver: &DataResolver,
    ) -> Vec<(String, usize, Option<String>)> {
        let config = self.config.as_ref();

        if !resolver.is_repeatable() {
            let row_name = resolver.row_name(0);
            let raw = definition.external_id_for(row_name.as_deref());
            if is_drop_marker(raw) {
                debug!("Case '{}' dropped by its external id", definition.name);
                return Vec::new();
            }
            if let Some(row) = resolver.rows().first() {
                if !row_selected(&config.rows, row) {
                    debug!("Only row of '{}' not selected", definition.name);
                    return Vec::new();
                }
            }
            let external_id = valid_external_id(raw);
            if config.sync_external_ids && external_id.is_none() {
                debug!("Case '{}' has no external id", definition.name);
                return Vec::new();
            }
            return vec![(definition.name.clone(), 0, external_id)];
        }

        resolver
            .rows()
            .iter()
            .enumerate()
            .filter_map(|(index, row)| {
                let row_name = resolver.row_name(index)?;
                if !row_selected(&config.rows, row) {
                    debug!("Row '{}' of '{}' not selected", row_name, definition.name);
                    return None;
                }

                let raw = definition.test_case_id_map.get(&row_name).map(String::as_str);
                if is_drop_marker(raw) {
                    return None;
                }
                let external_id = valid_external_id(raw);
                if config.sync_external_ids && external_id.is_none() {
                    debug!("Row '{}' of '{}' has no external id", row_name, definition.name);
                    return None;
                }

                Some((
                    format!("{}[{}]", definition.name, row_name),
                    index,
                    external_id,
                ))
            })
            .collect()
    }

    /// Runs the given case units and reports the results.
    pub fn execute(&self, units: Vec<CaseUnit>) -> Result<RunReport> {
        if units.is_empty() {
            return Err(EngineError::NoCasesSelected);
        }

        let started_at = Utc::now();
        let retry = self
            .config
            .retry
            .enabled
            .then(|| RetryStore::new(&self.config.state_dir));
        let monitor = Arc::new(ExecutionMonitor::new(
            Arc::new(self.reporters.clone()),
            retry,
        ));
        let services = Arc::new(CaseServices {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            monitor: Arc::clone(&monitor),
            sessions: Arc::clone(&self.sessions),
            capture: Arc::clone(&self.capture),
            feedback: self.feedback.clone(),
            before_run: OnceCell::new(),
        });

        monitor.run_started(units.len());

        let batches = batches(units);
        let workers = self.config.worker_count().min(batches.len()).max(1);
        info!(
            "Starting execution ({} batches, workers: {})",
            batches.len(),
            workers
        );

        let results = if workers == 1 {
            run_sequential(batches, &services)
        } else {
            run_parallel(batches, workers, &services)?
        };

        let report = RunReport::new(started_at, results);
        monitor.run_finished(&report);
        Ok(report)
    }
}

fn is_drop_marker(raw: Option<&str>) -> bool {
    raw.map(str::trim) == Some(DROP_MARKER)
}

fn valid_external_id(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|id| !id.is_empty() && *id != DROP_MARKER)
        .map(str::to_string)
}

/// Groups units into batches: one per series root, one per unseried case.
///
/// Units must already be in series order.
pub fn batches(units: Vec<CaseUnit>) -> Vec<Vec<CaseUnit>> {
    let mut batches: Vec<Vec<CaseUnit>> = Vec::new();
    let mut by_root: HashMap<SeriesNumber, usize> = HashMap::new();

    for unit in units {
        match unit.series().map(SeriesNumber::root) {
            Some(root) => match by_root.get(&root) {
                Some(&index) => batches[index].push(unit),
                None => {
                    by_root.insert(root, batches.len());
                    batches.push(vec![unit]);
                }
            },
            None => batches.push(vec![unit]),
        }
    }

    batches
}

fn run_sequential(batches: Vec<Vec<CaseUnit>>, services: &CaseServices) -> Vec<CaseResult> {
    let mut ctx = ExecutionContext::new(0);
    let results: Vec<CaseResult> = batches
        .into_iter()
        .flatten()
        .map(|unit| unit.run(&mut ctx, services))
        .collect();
    ctx.close_session();
    results
}

fn run_parallel(
    batches: Vec<Vec<CaseUnit>>,
    workers: usize,
    services: &Arc<CaseServices>,
) -> Result<Vec<CaseResult>> {
    let total: usize = batches.iter().map(Vec::len).sum();

    let (job_tx, job_rx): (Sender<Vec<CaseUnit>>, Receiver<Vec<CaseUnit>>) = channel();
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, result_rx): (Sender<CaseResult>, Receiver<CaseResult>) = channel();

    for batch in batches {
        job_tx
            .send(batch)
            .map_err(|e| EngineError::Config(format!("Failed to queue batch: {}", e)))?;
    }
    drop(job_tx);

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let services = Arc::clone(services);
            thread::spawn(move || worker_loop(worker, &jobs, &results, &services))
        })
        .collect();
    drop(result_tx);

    let mut collected = Vec::with_capacity(total);
    for result in result_rx {
        debug!(
            "Received '{}' ({}/{})",
            result.name,
            collected.len() + 1,
            total
        );
        collected.push(result);
    }

    for (worker, handle) in handles.into_iter().enumerate() {
        handle
            .join()
            .map_err(|_| EngineError::WorkerPanicked(worker))?;
    }

    Ok(collected)
}

/// Pulls batches until the job channel is drained.
fn worker_loop(
    worker: usize,
    jobs: &Mutex<Receiver<Vec<CaseUnit>>>,
    results: &Sender<CaseResult>,
    services: &CaseServices,
) {
    let mut ctx = ExecutionContext::new(worker);

    loop {
        let batch = match jobs.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok(batch) = batch else {
            break;
        };

        for unit in batch {
            let result = unit.run(&mut ctx, services);
            if let Err(e) = results.send(result) {
                error!("Worker {} failed to send result: {}", worker, e);
                ctx.close_session();
                return;
            }
        }
    }

    ctx.close_session();
}

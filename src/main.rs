//! CaseRunner CLI Entry Point
//!
//! Provides command-line interface for test case execution.
//!
//! # Usage
//!
//! ```bash
//! # Run every case under a directory
//! caserunner cases/
//!
//! # List the selected cases without running them
//! caserunner cases/ --tags smoke,!slow --dry-run
//!
//! # Four workers, retry from the last failure, JSON results
//! caserunner cases/ --workers 4 --retry --results out/results.json
//!
//! # Settings from a configuration file
//! caserunner cases/ --config caserunner.yaml
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info, warn};

use caserunner::config::RunConfig;
use caserunner::execution::{ActionRegistry, RunCoordinator};
use caserunner::report::ConsoleReporter;
use caserunner::{APP_NAME, VERSION};

/// Default case location used when no path is given.
const DEFAULT_CASES_DIR: &str = "cases";

/// Command-line options parsed from arguments.
///
/// Every `Option` overrides the matching configuration file value when set.
#[derive(Debug, Default)]
struct CliOptions {
    paths: Vec<PathBuf>,
    config_path: Option<PathBuf>,
    data_root: Option<PathBuf>,
    workers: Option<usize>,
    tags: Option<String>,
    retry: bool,
    retry_over_steps: Option<u32>,
    results: Option<PathBuf>,
    permissive: bool,
    dry_run: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Data-Driven Test Case Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: caserunner [OPTIONS] <PATHS...>");
    println!();
    println!("Arguments:");
    println!("  <PATHS...>               Case documents or directories (default: {})", DEFAULT_CASES_DIR);
    println!();
    println!("Options:");
    println!("  --config PATH            Load settings from a YAML or JSON file");
    println!("  --data-root PATH         Root directory of test data files");
    println!("  --workers N              Number of workers (0 = all CPUs)");
    println!("  --tags FILTER            Tag filter, e.g. smoke,!slow");
    println!("  --retry                  Resume failed cases from their last failure");
    println!("  --retry-over-steps N     Extra steps replayed as not run on retry");
    println!("  --results PATH           Write JSON results to PATH");
    println!("  --permissive             Unresolved parameters fall back to their key");
    println!("  --dry-run                List the selected cases without running them");
    println!("  --verbose                Enable debug logging");
    println!("  --help                   Show this help message");
    println!("  --version                Show version information");
    println!();
    println!("Examples:");
    println!("  caserunner cases/");
    println!("  caserunner cases/login.json --dry-run");
    println!("  caserunner cases/ --workers 4 --retry --results out/results.json");
}

/// Takes the value following a flag.
fn flag_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", flag))
}

/// Parses command-line arguments into CliOptions.
fn parse_arguments(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => options.dry_run = true,
            "--verbose" | "-v" => options.verbose = true,
            "--retry" => options.retry = true,
            "--permissive" => options.permissive = true,
            "--config" => {
                options.config_path = Some(PathBuf::from(flag_value(args, &mut i, arg)?));
            }
            "--data-root" => {
                options.data_root = Some(PathBuf::from(flag_value(args, &mut i, arg)?));
            }
            "--results" => {
                options.results = Some(PathBuf::from(flag_value(args, &mut i, arg)?));
            }
            "--tags" => {
                options.tags = Some(flag_value(args, &mut i, arg)?.to_string());
            }
            "--workers" => {
                let value = flag_value(args, &mut i, arg)?;
                options.workers = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid workers value: {}", value))?,
                );
            }
            "--retry-over-steps" => {
                let value = flag_value(args, &mut i, arg)?;
                options.retry_over_steps = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid retry-over-steps value: {}", value))?,
                );
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => options.paths.push(PathBuf::from(arg)),
        }
        i += 1;
    }

    if options.paths.is_empty() {
        options.paths.push(PathBuf::from(DEFAULT_CASES_DIR));
    }

    Ok(options)
}

/// Builds the run configuration: file values first, then flag overrides.
fn build_config(options: &CliOptions) -> Result<RunConfig, Box<dyn std::error::Error>> {
    let mut config = match &options.config_path {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    if let Some(root) = &options.data_root {
        config.data_root = root.clone();
    }
    if let Some(workers) = options.workers {
        config.workers = workers;
    }
    if let Some(tags) = &options.tags {
        config.apply_tag_filter(tags);
    }
    if options.retry {
        config.retry.enabled = true;
    }
    if let Some(over_steps) = options.retry_over_steps {
        config.retry.over_steps = over_steps;
    }
    if let Some(results) = &options.results {
        config.results_file = Some(results.clone());
    }
    if options.permissive {
        config.permissive_data = true;
    }

    if !config.data_root.is_dir() {
        warn!("Data root {} does not exist", config.data_root.display());
    }

    Ok(config)
}

/// Main application entry point. Returns whether every case passed.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let options = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(options.verbose);

    // Print banner
    print_banner();

    let config = build_config(&options)?;
    info!("Data root: {}", config.data_root.display());
    info!("Workers: {}", config.worker_count());
    if config.retry.enabled {
        info!("Retry on error: enabled (+{} steps)", config.retry.over_steps);
    }

    let mut coordinator = RunCoordinator::new(config, ActionRegistry::with_builtins());
    coordinator.add_reporter(Arc::new(ConsoleReporter::new(true)));

    let units = coordinator.load_and_filter(&options.paths).map_err(|e| {
        error!("Failed to load test cases: {}", e);
        e
    })?;

    if options.dry_run {
        info!("Mode: DRY RUN ({} cases selected)", units.len());
        println!();
        for unit in &units {
            let id = unit.external_id().unwrap_or("-");
            let series = unit
                .series()
                .map(|s| s.to_string())
                .unwrap_or_default();
            println!("  {:<40} {:<10} {:<8} {} steps", unit.name(), id, series, unit.steps().len());
        }
        return Ok(true);
    }

    let report = coordinator.execute(units)?;
    Ok(report.summary.all_passed())
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

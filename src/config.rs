//! Run Configuration
//!
//! Settings for one engine run. Loaded from a YAML or JSON file and then
//! overridden by command-line flags.
//!
//! # Example YAML Format
//!
//! ```yaml
//! data_root: testdata
//! workers: 4
//! stop_on_error: true
//! include_tags: [smoke]
//! exclude_tags: [slow]
//! retry:
//!   enabled: true
//!   over_steps: 1
//! screenshots:
//!   on_failure: true
//! hooks:
//!   before_run: core.log
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default directory for test data files.
pub const DEFAULT_DATA_ROOT: &str = "testdata";

/// Default directory for persisted run state.
pub const DEFAULT_STATE_DIR: &str = ".caserunner";

/// Complete configuration for a run.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RunConfig {
    /// Root directory that `File:` data references and the global data file live under
    pub data_root: PathBuf,

    /// Directory holding retry records
    pub state_dir: PathBuf,

    /// Number of workers; 1 runs sequentially, 0 uses all available CPUs
    pub workers: usize,

    /// Default stop-on-error policy for steps without an override
    pub stop_on_error: bool,

    /// Unresolvable parameters fall back to their literal key
    pub permissive_data: bool,

    /// Cases must carry one of these tags (when non-empty)
    pub include_tags: Vec<String>,

    /// Cases carrying any of these tags never run
    pub exclude_tags: Vec<String>,

    /// Data row selection for repeated cases
    pub rows: RowSelection,

    /// Drop data rows that have no external test case id
    pub sync_external_ids: bool,

    /// Publish case results to feedback connectors
    pub feedback: bool,

    /// Keep the session alive between cases unless a case fails
    pub keep_session: bool,

    pub screenshots: ScreenshotPolicy,

    pub retry: RetryConfig,

    pub hooks: HookConfig,

    /// Optional JSON results file
    pub results_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            workers: 1,
            stop_on_error: true,
            permissive_data: false,
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            rows: RowSelection::default(),
            sync_external_ids: false,
            feedback: false,
            keep_session: false,
            screenshots: ScreenshotPolicy::default(),
            retry: RetryConfig::default(),
            hooks: HookConfig::default(),
            results_file: None,
        }
    }
}

/// When step screenshots are captured.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScreenshotPolicy {
    pub on_success: bool,
    pub on_failure: bool,
}

impl Default for ScreenshotPolicy {
    fn default() -> Self {
        Self {
            on_success: false,
            on_failure: true,
        }
    }
}

/// Retry-on-error settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,

    /// Extra steps past the recorded failure that are replayed as no-run
    pub over_steps: u32,
}

/// Suite-level hooks, each naming a registered `object.action`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HookConfig {
    /// Invoked once for the whole run, before the first case's steps
    pub before_run: Option<String>,

    /// Invoked after every case
    pub after_case: Option<String>,
}

/// Column/value filters applied to repeated data rows.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RowSelection {
    /// Every pair must match for a row to be kept
    pub include: BTreeMap<String, String>,

    /// Any matching pair drops the row
    pub exclude: BTreeMap<String, String>,
}

impl RunConfig {
    /// Loads a configuration file; the format is picked by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;

        let config: RunConfig = match extension_of(path).as_deref() {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(EngineError::Config(format!(
                    "Unsupported config format '{}' for {}",
                    other.unwrap_or(""),
                    path.display()
                )))
            }
        };

        info!("Loaded run configuration from {}", path.display());
        Ok(config)
    }

    /// Effective worker count with the `0 = all CPUs` rule applied.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Splits a combined tag filter like `smoke,!slow` into the include and
    /// exclude lists.
    pub fn apply_tag_filter(&mut self, filter: &str) {
        for tag in filter.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match tag.strip_prefix('!') {
                Some(excluded) => self.exclude_tags.push(excluded.to_string()),
                None => self.include_tags.push(tag.to_string()),
            }
        }
    }
}

/// Lower-cased file extension.
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

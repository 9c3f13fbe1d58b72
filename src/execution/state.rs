//! Retry State Persistence
//!
//! When retry is enabled, a failing step records a retry point: the case,
//! the failed step's order and a snapshot of the session. The next run
//! replays the already-verified steps as no-run and resumes live after
//! the failure plus a configurable margin.
//!
//! Each case has its own record at `<state_dir>/retry/{case}.json`, so
//! workers never contend for a file.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::session::SessionSnapshot;
use crate::error::{EngineError, Result};

/// Subdirectory of the state dir holding retry records.
const RETRY_DIR: &str = "retry";

/// Where a case last failed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RetryPoint {
    pub case_id: String,

    /// Order of the failed step (1-based)
    pub step_order: usize,

    /// Session state right after the failure
    pub snapshot: SessionSnapshot,

    pub timestamp: SystemTime,
}

impl RetryPoint {
    pub fn new(case_id: &str, step_order: usize, snapshot: SessionSnapshot) -> Self {
        Self {
            case_id: case_id.to_string(),
            step_order,
            snapshot,
            timestamp: SystemTime::now(),
        }
    }

    /// Last step order replayed as no-run with the given margin.
    pub fn replay_until(&self, over_steps: u32) -> usize {
        self.step_order + over_steps as usize
    }
}

/// Case-scoped retry records on disk.
#[derive(Debug, Clone)]
pub struct RetryStore {
    dir: PathBuf,
}

impl RetryStore {
    /// Store rooted at `<state_dir>/retry`.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join(RETRY_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves (or replaces) the retry point of a case.
    pub fn save(&self, point: &RetryPoint) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| EngineError::io(&self.dir, e))?;

        let file = self.file_for(&point.case_id);
        let json = serde_json::to_string_pretty(point)?;
        fs::write(&file, json).map_err(|e| EngineError::io(&file, e))?;

        info!(
            "Saved retry point for '{}' at step {} to {}",
            point.case_id,
            point.step_order,
            file.display()
        );
        Ok(())
    }

    /// Loads the retry point of a case, if one was recorded.
    pub fn load(&self, case_id: &str) -> Result<Option<RetryPoint>> {
        let file = self.file_for(case_id);

        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::io(&file, e)),
        };
        let point: RetryPoint = serde_json::from_str(&content)?;

        debug!("Loaded retry point for '{}' from {}", case_id, file.display());
        Ok(Some(point))
    }

    /// Loads every record in the store, keyed by case id.
    pub fn load_all(&self) -> Result<HashMap<String, RetryPoint>> {
        let mut points = HashMap::new();
        if !self.dir.is_dir() {
            return Ok(points);
        }

        for entry in fs::read_dir(&self.dir).map_err(|e| EngineError::io(&self.dir, e))? {
            let path = entry.map_err(|e| EngineError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|e| EngineError::io(&path, e))?;
            let point: RetryPoint = serde_json::from_str(&content)?;
            points.insert(point.case_id.clone(), point);
        }

        info!("Loaded {} retry points from {}", points.len(), self.dir.display());
        Ok(points)
    }

    /// Deletes the record of a case.
    pub fn clear(&self, case_id: &str) -> Result<()> {
        let file = self.file_for(case_id);
        if file.exists() {
            fs::remove_file(&file).map_err(|e| EngineError::io(&file, e))?;
            info!("Cleared retry point for '{}'", case_id);
        }
        Ok(())
    }

    fn file_for(&self, case_id: &str) -> PathBuf {
        let stem: String = case_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", stem))
    }
}

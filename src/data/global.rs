//! Global Test Data
//!
//! One run-wide document shared by every case. It is discovered by file
//! name (`*testdata-global*`) under the data root, loaded once before any
//! case executes, and read-only afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_json::Value;

use super::source::{load_data_file, TestData};
use crate::error::{EngineError, Result};

/// File name fragment identifying the global data file.
pub const GLOBAL_FILE_MARKER: &str = "testdata-global";

/// The run-wide global document.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalData {
    document: Value,
}

impl GlobalData {
    /// Global data with no entries.
    pub fn empty() -> Self {
        Self {
            document: Value::Object(Default::default()),
        }
    }

    pub fn from_value(document: Value) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Finds and loads the global data file under `data_root`.
    ///
    /// Returns empty global data when the root or the file is absent.
    /// More than one candidate file is a fatal [`EngineError::GlobalDataAmbiguous`].
    pub fn discover(data_root: &Path) -> Result<Self> {
        let Some(path) = find_global_file(data_root)? else {
            debug!("No global test data under {}", data_root.display());
            return Ok(Self::empty());
        };

        match load_data_file(&path)? {
            TestData::Document(document) => {
                info!("Loaded global test data from {}", path.display());
                Ok(Self { document })
            }
            TestData::Rows(_) => Err(EngineError::DataFormatUnsupported(format!(
                "{}: global test data must be a document, not rows",
                path.display()
            ))),
        }
    }
}

/// Locates the single global data file, searching recursively.
pub fn find_global_file(data_root: &Path) -> Result<Option<PathBuf>> {
    if !data_root.is_dir() {
        return Ok(None);
    }

    let mut found = Vec::new();
    collect_candidates(data_root, &mut found)?;
    found.sort();

    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => Err(EngineError::GlobalDataAmbiguous(found)),
    }
}

fn collect_candidates(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| EngineError::io(dir, e))? {
        let path = entry.map_err(|e| EngineError::io(dir, e))?.path();
        if path.is_dir() {
            collect_candidates(&path, found)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.contains(GLOBAL_FILE_MARKER))
            .unwrap_or(false)
        {
            found.push(path);
        }
    }
    Ok(())
}

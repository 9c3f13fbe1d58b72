//! Engine Error Types
//!
//! Load-time structural errors are fatal for the whole run. Step-level
//! failures never surface here; they are recorded in the step result
//! through [`crate::execution::registry::ActionError`].

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Case definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("Invalid case definition '{path}': {reason}")]
    DefinitionInvalid { path: String, reason: String },

    #[error("Duplicate case name '{0}'")]
    DuplicateCaseName(String),

    #[error("External test case id '{id}' is used by both '{first}' and '{second}'")]
    DuplicateExternalId {
        id: String,
        first: String,
        second: String,
    },

    #[error("Parameter path '{key}' is invalid: segment '{segment}' is not an object")]
    ParameterPathInvalid { key: String, segment: String },

    #[error("Parameter '{0}' not found in test data")]
    ParameterMissing(String),

    #[error("Test object '{object}' has no action '{action}'")]
    ActionNotFound { object: String, action: String },

    #[error("Action '{object}.{action}' is not public")]
    ActionNotPublic { object: String, action: String },

    #[error("Unsupported test data format: {0}")]
    DataFormatUnsupported(String),

    #[error("{path}:{line}: expected {expected} columns, found {found}")]
    DataRowMismatch {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Could not restore session for '{case}': {reason}")]
    SessionRestoreFailed { case: String, reason: String },

    #[error("Malformed series number '{0}'")]
    SeriesNumberMalformed(String),

    #[error("More than one global test data file found: {0:?}")]
    GlobalDataAmbiguous(Vec<PathBuf>),

    #[error("No test cases selected to run")]
    NoCasesSelected,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("SQL test data error: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl EngineError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_mismatch_message_has_line() {
        let err = EngineError::DataRowMismatch {
            path: PathBuf::from("users.csv"),
            line: 4,
            expected: 3,
            found: 2,
        };
        assert_eq!(err.to_string(), "users.csv:4: expected 3 columns, found 2");
    }

    #[test]
    fn test_io_helper_keeps_path() {
        let err = EngineError::io(
            "missing.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("missing.json"));
    }
}

//! Case and Row Selection
//!
//! Tag filtering for case definitions and column/value selection for
//! repeated data rows.

use serde_json::{Map, Value};

use crate::config::RowSelection;

/// Include/exclude filter over a case's meta tags.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl TagFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: include.to_vec(),
            exclude: exclude.to_vec(),
        }
    }

    /// An exclude match rejects outright; otherwise an include match is
    /// required whenever include filters exist.
    pub fn matches(&self, tags: &[String]) -> bool {
        if tags.iter().any(|tag| self.exclude.contains(tag)) {
            return false;
        }
        self.include.is_empty() || tags.iter().any(|tag| self.include.contains(tag))
    }
}

/// Checks a data row against the configured selection.
pub fn row_selected(selection: &RowSelection, row: &Map<String, Value>) -> bool {
    let matches = |column: &String, expected: &String| {
        row.get(column)
            .map(|value| value_text(value) == *expected)
            .unwrap_or(false)
    };

    if selection.exclude.iter().any(|(c, v)| matches(c, v)) {
        return false;
    }
    selection.include.iter().all(|(c, v)| matches(c, v))
}

/// Text form of a scalar cell used for comparisons and names.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

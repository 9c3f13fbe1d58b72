//! Series Numbers
//!
//! Dotted numeric identifiers (`1`, `2.1`, `2.1.3`) that order related cases
//! into a sequential sub-run. Comparison is numeric per component, so `1.10`
//! sorts after `1.9`.

use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesNumber(Vec<u32>);

impl SeriesNumber {
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Group key: every component except the last. A single-component
    /// number forms its own root group.
    pub fn root(&self) -> SeriesNumber {
        match self.0.split_last() {
            Some((_, head)) if !head.is_empty() => SeriesNumber(head.to_vec()),
            _ => SeriesNumber(Vec::new()),
        }
    }
}

impl FromStr for SeriesNumber {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(EngineError::SeriesNumberMalformed(s.to_string()));
        }

        trimmed
            .split('.')
            .map(|part| {
                part.trim()
                    .parse::<u32>()
                    .map_err(|_| EngineError::SeriesNumberMalformed(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(SeriesNumber)
    }
}

impl fmt::Display for SeriesNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

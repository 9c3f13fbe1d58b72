//! Case Definition Model
//!
//! Immutable descriptions of test cases as read from definition documents.
//!
//! # Example JSON Format
//!
//! ```json
//! {
//!   "type": "web",
//!   "meta": ["smoke", "login"],
//!   "testDataRef": "File:users.csv",
//!   "testCaseIdMap": { "admin": "TC-101", "guest": "TC-102" },
//!   "startURL": "https://example.test/login",
//!   "steps": [
//!     { "testObject": "login", "name": "enterUser", "using": "user" },
//!     { "testObject": "login", "name": "submit", "stopOnError": true },
//!     { "testObject": "core", "name": "assertEquals", "using": "[expected, actual]" }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Case type used when a document does not declare one.
pub const DEFAULT_CASE_TYPE: &str = "web";

/// `using` entry that binds the whole data row as one parameter.
pub const WHOLE_ROW: &str = "*";

/// Prefix of file-based data references.
pub const FILE_REF_PREFIX: &str = "File:";

/// A declarative test case.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CaseDefinition {
    /// Case name, derived from the document path
    #[serde(skip)]
    pub name: String,

    /// Document this case was read from
    #[serde(skip)]
    pub source: PathBuf,

    /// Symbolic case type (web, rest, headless, ...)
    #[serde(rename = "type", default = "default_case_type")]
    pub case_type: String,

    /// Meta tags used for filtering
    #[serde(default)]
    pub meta: Vec<String>,

    /// Where the test data comes from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_data_ref: Option<DataRef>,

    /// Extra hierarchical data merged under the primary data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_test_data_file: Option<String>,

    /// Dotted sequence number, e.g. `2.1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_number: Option<String>,

    /// External test-management id for single-row cases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,

    /// External ids per data row name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub test_case_id_map: BTreeMap<String, String>,

    /// Resource opened before the first step
    #[serde(rename = "startURL", default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,

    /// Session headless override; only `false` changes the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,

    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

fn default_case_type() -> String {
    DEFAULT_CASE_TYPE.to_string()
}

/// Declared source of a case's test data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum DataRef {
    /// `File:<path>` relative to the data root
    Reference(String),
    /// Inline list of rows
    Rows(Vec<Map<String, Value>>),
    /// Inline hierarchical document
    Document(Map<String, Value>),
}

impl DataRef {
    /// Returns the referenced file path for `File:` references.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            DataRef::Reference(reference) => reference
                .strip_prefix(FILE_REF_PREFIX)
                .map(str::trim)
                .filter(|p| !p.is_empty()),
            _ => None,
        }
    }
}

/// One step of a case.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Registered test object implementing the action
    pub test_object: String,

    /// Action name
    pub name: String,

    /// Parameter keys bound to the action
    #[serde(deserialize_with = "key_list", default, skip_serializing_if = "Vec::is_empty")]
    pub using: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_error: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_screenshot: Option<bool>,

    /// A hard failure is recorded as skipped and never stops the case
    #[serde(default)]
    pub skip_on_error: bool,

    /// Action on the same test object invoked when this step fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Parameter binding declared by a step's `using`.
#[derive(Debug, Clone, PartialEq)]
pub enum Using {
    Nothing,
    WholeRow,
    Keys(Vec<String>),
}

/// Parses a `using` string: `a`, `a, b` or `[a, b]`.
pub fn parse_key_list(expr: &str) -> Vec<String> {
    let trimmed = expr.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    inner
        .split(',')
        .map(|part| part.trim().trim_matches('"').trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Deserializes either a key-list string or an array of keys.
fn key_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(parse_key_list(&s)),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.trim().to_string()),
                _ => Err(de::Error::custom("Expected string in 'using' list")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings for 'using'")),
    }
}

impl StepDefinition {
    /// Creates a step invoking `action` on `test_object`.
    ///
    /// # Example
    ///
    /// ```
    /// use caserunner::definition::StepDefinition;
    ///
    /// let step = StepDefinition::new("login", "enterUser")
    ///     .with_using("user")
    ///     .with_stop_on_error(true);
    /// assert_eq!(step.using, vec!["user"]);
    /// ```
    pub fn new(test_object: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            test_object: test_object.into().trim().to_string(),
            name: action.into().trim().to_string(),
            using: Vec::new(),
            stop_on_error: None,
            take_screenshot: None,
            skip_on_error: false,
            undo: None,
            comment: None,
        }
    }

    /// Sets the parameter keys from a `using` expression.
    pub fn with_using(mut self, expr: &str) -> Self {
        self.using = parse_key_list(expr);
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = Some(stop);
        self
    }

    pub fn with_screenshot(mut self, take: bool) -> Self {
        self.take_screenshot = Some(take);
        self
    }

    pub fn with_skip_on_error(mut self, skip: bool) -> Self {
        self.skip_on_error = skip;
        self
    }

    pub fn with_undo(mut self, action: impl Into<String>) -> Self {
        self.undo = Some(action.into());
        self
    }

    /// Interprets the `using` keys.
    pub fn binding(&self) -> Using {
        match self.using.as_slice() {
            [] => Using::Nothing,
            [only] if only == WHOLE_ROW => Using::WholeRow,
            keys => Using::Keys(keys.to_vec()),
        }
    }
}

impl CaseDefinition {
    /// Creates a definition with the given name and steps.
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            source: PathBuf::new(),
            case_type: default_case_type(),
            meta: Vec::new(),
            test_data_ref: None,
            additional_test_data_file: None,
            series_number: None,
            test_case_id: None,
            test_case_id_map: BTreeMap::new(),
            start_url: None,
            headless: None,
            steps,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.meta = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_data(mut self, data: DataRef) -> Self {
        self.test_data_ref = Some(data);
        self
    }

    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series_number = Some(series.into());
        self
    }

    pub fn with_test_case_id(mut self, id: impl Into<String>) -> Self {
        self.test_case_id = Some(id.into());
        self
    }

    pub fn with_start_url(mut self, url: impl Into<String>) -> Self {
        self.start_url = Some(url.into());
        self
    }

    /// External id for a data row, falling back to the case-level id.
    pub fn external_id_for(&self, row_name: Option<&str>) -> Option<&str> {
        row_name
            .and_then(|name| self.test_case_id_map.get(name))
            .or(self.test_case_id.as_ref())
            .map(String::as_str)
    }

    /// Distinct test objects referenced by the steps.
    pub fn test_objects(&self) -> Vec<&str> {
        let mut objects: Vec<&str> = self.steps.iter().map(|s| s.test_object.as_str()).collect();
        objects.sort_unstable();
        objects.dedup();
        objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_list_variants() {
        assert_eq!(parse_key_list("user"), vec!["user"]);
        assert_eq!(parse_key_list("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(parse_key_list("[a, b]"), vec!["a", "b"]);
        assert_eq!(parse_key_list("[\"a\", \"b\"]"), vec!["a", "b"]);
        assert!(parse_key_list("").is_empty());
        assert!(parse_key_list("[]").is_empty());
    }

    #[test]
    fn test_binding() {
        assert_eq!(StepDefinition::new("o", "a").binding(), Using::Nothing);
        assert_eq!(
            StepDefinition::new("o", "a").with_using("*").binding(),
            Using::WholeRow
        );
        assert_eq!(
            StepDefinition::new("o", "a").with_using("x,y").binding(),
            Using::Keys(vec!["x".to_string(), "y".to_string()])
        );
    }

    #[test]
    fn test_deserialize_document() {
        let json = r#"{
            "type": "rest",
            "meta": ["smoke"],
            "testDataRef": "File:users.csv",
            "seriesNumber": "1.2",
            "testCaseId": "TC-7",
            "startURL": "https://example.test",
            "steps": [
                {"testObject": "api", "name": "get", "using": "[path, query]", "stopOnError": false},
                {"testObject": "api", "name": "check", "using": ["status"], "takeScreenshot": true}
            ]
        }"#;

        let case: CaseDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(case.case_type, "rest");
        assert_eq!(case.meta, vec!["smoke"]);
        assert_eq!(case.test_data_ref.as_ref().unwrap().file_path(), Some("users.csv"));
        assert_eq!(case.series_number.as_deref(), Some("1.2"));
        assert_eq!(case.start_url.as_deref(), Some("https://example.test"));
        assert_eq!(case.steps.len(), 2);
        assert_eq!(case.steps[0].using, vec!["path", "query"]);
        assert_eq!(case.steps[0].stop_on_error, Some(false));
        assert_eq!(case.steps[1].using, vec!["status"]);
        assert_eq!(case.steps[1].take_screenshot, Some(true));
        assert!(!case.steps[1].skip_on_error);
    }

    #[test]
    fn test_deserialize_defaults() {
        let case: CaseDefinition =
            serde_json::from_str(r#"{"steps": [{"testObject": "core", "name": "log"}]}"#).unwrap();
        assert_eq!(case.case_type, DEFAULT_CASE_TYPE);
        assert!(case.meta.is_empty());
        assert!(case.test_data_ref.is_none());
        assert!(case.steps[0].using.is_empty());
    }

    #[test]
    fn test_inline_rows_and_document() {
        let rows: DataRef = serde_json::from_str(r#"[{"user": "a"}, {"user": "b"}]"#).unwrap();
        assert!(matches!(rows, DataRef::Rows(ref r) if r.len() == 2));

        let doc: DataRef = serde_json::from_str(r#"{"user": {"name": "a"}}"#).unwrap();
        assert!(matches!(doc, DataRef::Document(_)));
        assert!(doc.file_path().is_none());
    }

    #[test]
    fn test_bad_using_type() {
        let result: Result<StepDefinition, _> =
            serde_json::from_str(r#"{"testObject": "o", "name": "a", "using": 5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_external_id_for() {
        let mut case = CaseDefinition::new("c", vec![]).with_test_case_id("TC-1");
        case.test_case_id_map.insert("admin".to_string(), "TC-2".to_string());

        assert_eq!(case.external_id_for(Some("admin")), Some("TC-2"));
        assert_eq!(case.external_id_for(Some("guest")), Some("TC-1"));
        assert_eq!(case.external_id_for(None), Some("TC-1"));
    }

    #[test]
    fn test_test_objects_dedup() {
        let case = CaseDefinition::new(
            "c",
            vec![
                StepDefinition::new("b", "x"),
                StepDefinition::new("a", "y"),
                StepDefinition::new("b", "z"),
            ],
        );
        assert_eq!(case.test_objects(), vec!["a", "b"]);
    }
}

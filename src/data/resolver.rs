//! Data Resolver
//!
//! Resolves named step parameters to values. Lookup order for a key:
//!
//! 1. `global.`-prefixed keys go to the global document only
//! 2. The current data row, when the key exists there
//! 3. The hierarchical document (dot-path descent)
//! 4. The literal key in permissive mode, otherwise an error
//!
//! Dot paths descend nested objects: `user.address.city`. A final
//! `values` segment selects a list without resolving it further, so
//! `cities.values` on `{"cities": ["a", "b"]}` returns the whole list.

use std::path::Path;
use std::sync::Arc;

use log::debug;
use serde_json::{Map, Value};

use super::global::GlobalData;
use super::source::{data_file_path, load_data_file, load_data_ref, Row, TestData};
use crate::definition::filter::value_text;
use crate::definition::CaseDefinition;
use crate::error::{EngineError, Result};

/// Reserved key prefix for global data.
pub const GLOBAL_PREFIX: &str = "global.";

/// Final path segment selecting a nested list as-is.
pub const LIST_SELECTOR: &str = "values";

/// Column that names a data row.
pub const ROW_NAME_COLUMN: &str = "name";

/// Parameter lookup for one case definition.
#[derive(Debug, Clone)]
pub struct DataResolver {
    rows: Vec<Row>,
    document: Option<Value>,
    global: Arc<GlobalData>,
    permissive: bool,
}

impl DataResolver {
    /// Creates a resolver without local data.
    pub fn new(global: Arc<GlobalData>) -> Self {
        Self {
            rows: Vec::new(),
            document: None,
            global,
            permissive: false,
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_document(mut self, document: Value) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_permissive(mut self, permissive: bool) -> Self {
        self.permissive = permissive;
        self
    }

    /// Builds the resolver for a case from its declared data sources.
    pub fn load(
        case: &CaseDefinition,
        data_root: &Path,
        global: Arc<GlobalData>,
        permissive: bool,
    ) -> Result<Self> {
        let mut resolver = Self::new(global).with_permissive(permissive);

        if let Some(data_ref) = &case.test_data_ref {
            match load_data_ref(data_ref, data_root)? {
                TestData::Rows(rows) => resolver.rows = rows,
                TestData::Document(doc) => resolver.document = Some(doc),
            }
        }

        if let Some(extra) = &case.additional_test_data_file {
            let path = data_file_path(extra, data_root);
            match load_data_file(&path)? {
                TestData::Document(extra_doc) => {
                    let merged = match resolver.document.take() {
                        Some(mut doc) => {
                            merge_missing(&mut doc, extra_doc);
                            doc
                        }
                        None => extra_doc,
                    };
                    resolver.document = Some(merged);
                }
                TestData::Rows(_) => {
                    return Err(EngineError::DataFormatUnsupported(format!(
                        "{}: additional test data must be a document",
                        path.display()
                    )))
                }
            }
        }

        debug!(
            "Data for '{}': {} rows, document: {}",
            case.name,
            resolver.rows.len(),
            resolver.document.is_some()
        );
        Ok(resolver)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// More than one row: the case expands into one unit per row.
    pub fn is_repeatable(&self) -> bool {
        self.rows.len() > 1
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Name of a data row: its `name` column, or `row<N>` (1-based).
    pub fn row_name(&self, row_index: usize) -> Option<String> {
        let row = self.rows.get(row_index)?;
        let named = row
            .get(ROW_NAME_COLUMN)
            .map(value_text)
            .filter(|name| !name.trim().is_empty());
        Some(named.unwrap_or_else(|| format!("row{}", row_index + 1)))
    }

    /// Resolves `key` for the given row.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use serde_json::json;
    /// use caserunner::data::{DataResolver, GlobalData};
    ///
    /// let resolver = DataResolver::new(Arc::new(GlobalData::empty()))
    ///     .with_document(json!({"a": {"b": {"c": 5}}}));
    /// assert_eq!(resolver.resolve("a.b.c", 0).unwrap(), json!(5));
    /// ```
    pub fn resolve(&self, key: &str, row_index: usize) -> Result<Value> {
        let key = key.trim();

        if let Some(global_key) = key.strip_prefix(GLOBAL_PREFIX) {
            return match lookup_value(self.global.document(), global_key)? {
                Some(value) => Ok(value.clone()),
                None => self.fallback(key),
            };
        }

        if let Some(row) = self.rows.get(row_index) {
            if let Some(value) = lookup(row, key)? {
                return Ok(value.clone());
            }
        }

        if let Some(document) = &self.document {
            if let Some(value) = lookup_value(document, key)? {
                return Ok(value.clone());
            }
        }

        self.fallback(key)
    }

    /// The whole row as one object; without rows, the document itself.
    pub fn whole_row(&self, row_index: usize) -> Result<Value> {
        if let Some(row) = self.rows.get(row_index) {
            return Ok(Value::Object(row.clone()));
        }
        match &self.document {
            Some(document @ Value::Object(_)) => Ok(document.clone()),
            _ => Err(EngineError::ParameterMissing(
                crate::definition::model::WHOLE_ROW.to_string(),
            )),
        }
    }

    fn fallback(&self, key: &str) -> Result<Value> {
        if self.permissive {
            debug!("Parameter '{}' not found, using literal key", key);
            Ok(Value::String(key.to_string()))
        } else {
            Err(EngineError::ParameterMissing(key.to_string()))
        }
    }
}

fn lookup_value<'a>(root: &'a Value, key: &str) -> Result<Option<&'a Value>> {
    match root {
        Value::Object(map) => lookup(map, key),
        _ => Ok(None),
    }
}

/// Exact key first, then dot-path descent.
fn lookup<'a>(root: &'a Map<String, Value>, key: &str) -> Result<Option<&'a Value>> {
    if let Some(value) = root.get(key) {
        return Ok(Some(value));
    }

    let segments: Vec<&str> = key.split('.').collect();
    let Some((last, path)) = segments.split_last() else {
        return Ok(None);
    };
    if path.is_empty() {
        return Ok(None);
    }

    let mut current = match root.get(path[0]) {
        Some(value) => value,
        None => return Ok(None),
    };
    let mut walked = path[0];

    for segment in &path[1..] {
        match current {
            Value::Object(map) => match map.get(*segment) {
                Some(next) => {
                    current = next;
                    walked = *segment;
                }
                None => return Ok(None),
            },
            _ => return Err(path_invalid(key, walked)),
        }
    }

    match current {
        Value::Object(map) => Ok(map.get(*last)),
        Value::Array(_) if *last == LIST_SELECTOR => Ok(Some(current)),
        _ => Err(path_invalid(key, walked)),
    }
}

fn path_invalid(key: &str, segment: &str) -> EngineError {
    EngineError::ParameterPathInvalid {
        key: key.to_string(),
        segment: segment.to_string(),
    }
}

/// Copies keys from `extra` that `base` lacks, recursing into objects both
/// sides share.
fn merge_missing(base: &mut Value, extra: Value) {
    if let (Value::Object(base_map), Value::Object(extra_map)) = (base, extra) {
        for (key, value) in extra_map {
            match base_map.get_mut(&key) {
                Some(existing) => merge_missing(existing, value),
                None => {
                    base_map.insert(key, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    use crate::definition::{DataRef, StepDefinition};

    fn global(value: Value) -> Arc<GlobalData> {
        Arc::new(GlobalData::from_value(value))
    }

    fn rows(value: Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    fn doc_resolver(doc: Value) -> DataResolver {
        DataResolver::new(Arc::new(GlobalData::empty())).with_document(doc)
    }

    #[test]
    fn test_dot_path() {
        let resolver = doc_resolver(json!({"a": {"b": {"c": 5}}}));
        assert_eq!(resolver.resolve("a.b.c", 0).unwrap(), json!(5));
        assert_eq!(resolver.resolve("a.b", 0).unwrap(), json!({"c": 5}));
    }

    #[test]
    fn test_values_selector_returns_list() {
        let resolver = doc_resolver(json!({"a": {"b": [1, 2, 3]}}));
        assert_eq!(resolver.resolve("a.b.values", 0).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_non_object_intermediate_is_invalid() {
        let resolver = doc_resolver(json!({"a": {"b": "text"}}));
        match resolver.resolve("a.b.c", 0) {
            Err(EngineError::ParameterPathInvalid { key, segment }) => {
                assert_eq!(key, "a.b.c");
                assert_eq!(segment, "b");
            }
            other => panic!("unexpected: {:?}", other),
        }

        let resolver = doc_resolver(json!({"a": [1, 2], "n": 3}));
        assert!(matches!(
            resolver.resolve("a.first", 0),
            Err(EngineError::ParameterPathInvalid { .. })
        ));
        assert!(matches!(
            resolver.resolve("n.x.y", 0),
            Err(EngineError::ParameterPathInvalid { .. })
        ));
    }

    #[test]
    fn test_exact_dotted_key_wins() {
        let resolver = doc_resolver(json!({"a.b": "flat", "a": {"b": "nested"}}));
        assert_eq!(resolver.resolve("a.b", 0).unwrap(), json!("flat"));
    }

    #[test]
    fn test_row_before_document() {
        let resolver = DataResolver::new(Arc::new(GlobalData::empty()))
            .with_rows(rows(json!([{"user": "ann"}, {"user": "bob"}])))
            .with_document(json!({"user": "doc", "only_doc": 1}));

        assert_eq!(resolver.resolve("user", 0).unwrap(), json!("ann"));
        assert_eq!(resolver.resolve("user", 1).unwrap(), json!("bob"));
        assert_eq!(resolver.resolve("only_doc", 1).unwrap(), json!(1));
    }

    #[test]
    fn test_global_prefix() {
        let resolver = DataResolver::new(global(json!({"env": {"url": "http://qa"}})))
            .with_document(json!({"env": {"url": "local"}}));

        assert_eq!(resolver.resolve("global.env.url", 0).unwrap(), json!("http://qa"));
        assert_eq!(resolver.resolve("env.url", 0).unwrap(), json!("local"));
    }

    #[test]
    fn test_missing_key_strict_and_permissive() {
        let strict = doc_resolver(json!({}));
        assert!(matches!(
            strict.resolve("nope", 0),
            Err(EngineError::ParameterMissing(k)) if k == "nope"
        ));

        let permissive = doc_resolver(json!({})).with_permissive(true);
        assert_eq!(permissive.resolve("nope", 0).unwrap(), json!("nope"));
        assert_eq!(permissive.resolve("global.x", 0).unwrap(), json!("global.x"));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let resolver = DataResolver::new(Arc::new(GlobalData::empty()))
            .with_rows(rows(json!([{"n": {"deep": [1, {"x": true}]}}])));

        let first = resolver.resolve("n.deep.values", 0).unwrap();
        for _ in 0..5 {
            assert_eq!(resolver.resolve("n.deep.values", 0).unwrap(), first);
        }
    }

    #[test]
    fn test_repeatable_and_row_names() {
        let resolver = DataResolver::new(Arc::new(GlobalData::empty()))
            .with_rows(rows(json!([{"name": "admin"}, {"name": ""}, {"other": 1}])));

        assert!(resolver.is_repeatable());
        assert_eq!(resolver.row_name(0).as_deref(), Some("admin"));
        assert_eq!(resolver.row_name(1).as_deref(), Some("row2"));
        assert_eq!(resolver.row_name(2).as_deref(), Some("row3"));
        assert_eq!(resolver.row_name(3), None);

        let single = DataResolver::new(Arc::new(GlobalData::empty()))
            .with_rows(rows(json!([{"a": 1}])));
        assert!(!single.is_repeatable());
    }

    #[test]
    fn test_whole_row() {
        let resolver = DataResolver::new(Arc::new(GlobalData::empty()))
            .with_rows(rows(json!([{"a": 1, "b": 2}])));
        assert_eq!(resolver.whole_row(0).unwrap(), json!({"a": 1, "b": 2}));

        let empty = DataResolver::new(Arc::new(GlobalData::empty()));
        assert!(matches!(empty.whole_row(0), Err(EngineError::ParameterMissing(_))));
    }

    #[test]
    fn test_load_with_additional_file() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("extra.json"), r#"{"user": {"role": "admin", "name": "x"}, "lang": "en"}"#)
            .unwrap();

        let mut case = CaseDefinition::new("c", vec![StepDefinition::new("core", "log")])
            .with_data(DataRef::Document(
                json!({"user": {"name": "ann"}}).as_object().cloned().unwrap(),
            ));
        case.additional_test_data_file = Some("File:extra.json".to_string());

        let resolver =
            DataResolver::load(&case, temp_dir.path(), Arc::new(GlobalData::empty()), false)
                .unwrap();
        assert_eq!(resolver.resolve("user.name", 0).unwrap(), json!("ann"));
        assert_eq!(resolver.resolve("user.role", 0).unwrap(), json!("admin"));
        assert_eq!(resolver.resolve("lang", 0).unwrap(), json!("en"));
    }

    #[test]
    fn test_load_csv_reference() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("users.csv"), "name;pw\nann;1\nbob;2\n").unwrap();

        let case = CaseDefinition::new("c", vec![StepDefinition::new("core", "log")])
            .with_data(DataRef::Reference("File:users.csv".to_string()));
        let resolver =
            DataResolver::load(&case, temp_dir.path(), Arc::new(GlobalData::empty()), false)
                .unwrap();

        assert_eq!(resolver.row_count(), 2);
        assert_eq!(resolver.resolve("pw", 1).unwrap(), json!("2"));
    }
}

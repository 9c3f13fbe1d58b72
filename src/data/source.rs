//! Test Data Sources
//!
//! Loads test data by declared source type:
//! - Inline rows or an inline document from the case definition
//! - Delimited text (`.csv`, semicolon separated, with comments)
//! - Structured documents (`.json`, `.yaml`, `.yml`)
//! - SQL scripts (`.sql`), run against an in-memory SQLite database
//!
//! # CSV Format
//!
//! ```text
//! user;password;expected
//! # line comment
//! // another line comment
//! /* admin;secret;ok */
//! guest;guest;denied
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Batch, Connection};
use serde_json::{Map, Number, Value};

use crate::config::extension_of;
use crate::definition::DataRef;
use crate::error::{EngineError, Result};

/// One data row: column name to value.
pub type Row = Map<String, Value>;

/// Field separator for delimited text.
const CSV_SEPARATOR: char = ';';

/// Loaded test data in one of the two shapes the resolver understands.
#[derive(Debug, Clone, PartialEq)]
pub enum TestData {
    Rows(Vec<Row>),
    Document(Value),
}

/// Loads the data a case declares. `File:` paths are relative to `data_root`.
pub fn load_data_ref(data_ref: &DataRef, data_root: &Path) -> Result<TestData> {
    match data_ref {
        DataRef::Rows(rows) => Ok(TestData::Rows(rows.clone())),
        DataRef::Document(doc) => Ok(TestData::Document(Value::Object(doc.clone()))),
        DataRef::Reference(reference) => match data_ref.file_path() {
            Some(relative) => load_data_file(&data_root.join(relative)),
            None => Err(EngineError::DataFormatUnsupported(format!(
                "data reference '{}' (expected 'File:<path>')",
                reference
            ))),
        },
    }
}

/// Resolves a path that may or may not carry the `File:` prefix.
pub fn data_file_path(reference: &str, data_root: &Path) -> PathBuf {
    let relative = reference
        .trim()
        .strip_prefix(crate::definition::model::FILE_REF_PREFIX)
        .unwrap_or(reference)
        .trim();
    data_root.join(relative)
}

/// Loads a data file, picking the loader by extension.
pub fn load_data_file(path: &Path) -> Result<TestData> {
    debug!("Loading test data: {}", path.display());

    let content = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;

    let data = match extension_of(path).as_deref() {
        Some("csv") => TestData::Rows(parse_csv(&content, path)?),
        Some("json") => structured(serde_json::from_str(&content)?, path)?,
        Some("yaml") | Some("yml") => structured(serde_yaml::from_str(&content)?, path)?,
        Some("sql") => TestData::Rows(run_sql_script(&content)?),
        _ => {
            return Err(EngineError::DataFormatUnsupported(
                path.display().to_string(),
            ))
        }
    };

    if let TestData::Rows(rows) = &data {
        info!("Loaded {} data rows from {}", rows.len(), path.display());
    }
    Ok(data)
}

/// An array of objects is row data; an object is a hierarchical document.
fn structured(value: Value, path: &Path) -> Result<TestData> {
    match value {
        Value::Object(_) => Ok(TestData::Document(value)),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                _ => Err(EngineError::DataFormatUnsupported(format!(
                    "{}: row lists must contain only objects",
                    path.display()
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(TestData::Rows),
        _ => Err(EngineError::DataFormatUnsupported(format!(
            "{}: expected an object or a list of objects",
            path.display()
        ))),
    }
}

/// Parses semicolon-separated text. The first data line is the header.
///
/// Lines starting with `#` or `//` and anything inside `/* ... */` (which
/// may span lines) are ignored. A row whose column count differs from the
/// header fails with its 1-based line number.
pub fn parse_csv(content: &str, path: &Path) -> Result<Vec<Row>> {
    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut in_block = false;

    for (index, raw_line) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = strip_block_comments(raw_line, &mut in_block);
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let fields = split_fields(line);

        if header.is_none() {
            header = Some(fields);
            continue;
        }
        let columns = header.as_deref().unwrap_or_default();

        if fields.len() != columns.len() {
            return Err(EngineError::DataRowMismatch {
                path: path.to_path_buf(),
                line: line_number,
                expected: columns.len(),
                found: fields.len(),
            });
        }

        let row: Row = columns
            .iter()
            .cloned()
            .zip(fields.into_iter().map(Value::String))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Removes `/* ... */` sections from a line, tracking comments that stay
/// open across lines.
fn strip_block_comments(line: &str, in_block: &mut bool) -> String {
    let mut kept = String::new();
    let mut rest = line;

    loop {
        if *in_block {
            match rest.find("*/") {
                Some(end) => {
                    rest = &rest[end + 2..];
                    *in_block = false;
                }
                None => return kept,
            }
        }

        match rest.find("/*") {
            Some(start) => {
                kept.push_str(&rest[..start]);
                rest = &rest[start + 2..];
                *in_block = true;
            }
            None => {
                kept.push_str(rest);
                return kept;
            }
        }
    }
}

/// Splits a line on the separator, honouring double-quoted fields.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => quoted = !quoted,
            c if c == CSV_SEPARATOR && !quoted => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Runs a SQL script in a fresh in-memory database. Rows of the last
/// row-returning statement become the data rows.
pub fn run_sql_script(script: &str) -> Result<Vec<Row>> {
    let conn = Connection::open_in_memory()?;
    let mut rows = Vec::new();
    let mut batch = Batch::new(&conn, script);

    while let Some(mut stmt) = batch.next()? {
        if stmt.column_count() == 0 {
            stmt.execute([])?;
            continue;
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut result = Vec::new();
        let mut query = stmt.query([])?;

        while let Some(record) = query.next()? {
            let mut row = Row::new();
            for (index, column) in columns.iter().enumerate() {
                let cell: SqlValue = record.get(index)?;
                row.insert(column.clone(), sql_to_json(cell));
            }
            result.push(row);
        }
        rows = result;
    }

    Ok(rows)
}

fn sql_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Number(i.into()),
        SqlValue::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn csv(content: &str) -> Result<Vec<Row>> {
        parse_csv(content, Path::new("test.csv"))
    }

    #[test]
    fn test_csv_basic() {
        let rows = csv("user;password\nadmin;secret\nguest;guest\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["user"], json!("admin"));
        assert_eq!(rows[1]["password"], json!("guest"));
    }

    #[test]
    fn test_csv_block_wrapped_line_ignored() {
        let rows = csv("user;password\n/* admin;secret */\nguest;guest\nroot;toor").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["user"], json!("guest"));
        assert_eq!(rows[1]["user"], json!("root"));
    }

    #[test]
    fn test_csv_multiline_block_and_line_comments() {
        let content = "# header comment\na;b\n/* first\n1;2\n*/\n// skipped\n3;4\n";
        let rows = csv(content).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["a"], json!("3"));
    }

    #[test]
    fn test_csv_inline_block_comment() {
        let rows = csv("a;b\n1;/* note */2\n").unwrap();
        assert_eq!(rows[0]["b"], json!("2"));
    }

    #[test]
    fn test_csv_quoted_separator() {
        let rows = csv("name;text\nx;\"a;b\"\n").unwrap();
        assert_eq!(rows[0]["text"], json!("a;b"));
    }

    #[test]
    fn test_csv_mismatch_reports_line() {
        let err = csv("a;b;c\n1;2;3\n\n4;5\n").unwrap_err();
        match err {
            EngineError::DataRowMismatch {
                line,
                expected,
                found,
                ..
            } => {
                assert_eq!(line, 4);
                assert_eq!(expected, 3);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_csv_header_only() {
        assert!(csv("a;b\n").unwrap().is_empty());
    }

    #[test]
    fn test_sql_script_rows() {
        let rows = run_sql_script(
            "CREATE TABLE users (name TEXT, age INTEGER, score REAL);
             INSERT INTO users VALUES ('ann', 31, 1.5), ('bob', 42, NULL);
             SELECT name, age, score FROM users ORDER BY name;",
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], json!("ann"));
        assert_eq!(rows[0]["age"], json!(31));
        assert_eq!(rows[0]["score"], json!(1.5));
        assert_eq!(rows[1]["score"], Value::Null);
    }

    #[test]
    fn test_sql_script_without_select() {
        let rows = run_sql_script("CREATE TABLE t (a TEXT);").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_load_json_document_and_rows() {
        let temp_dir = tempdir().unwrap();
        let doc_path = temp_dir.path().join("doc.json");
        let rows_path = temp_dir.path().join("rows.json");
        fs::write(&doc_path, r#"{"user": {"name": "ann"}}"#).unwrap();
        fs::write(&rows_path, r#"[{"user": "a"}, {"user": "b"}]"#).unwrap();

        assert!(matches!(load_data_file(&doc_path).unwrap(), TestData::Document(_)));
        assert!(matches!(load_data_file(&rows_path).unwrap(), TestData::Rows(r) if r.len() == 2));
    }

    #[test]
    fn test_load_yaml_document() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("doc.yaml");
        fs::write(&path, "user:\n  name: ann\n").unwrap();

        match load_data_file(&path).unwrap() {
            TestData::Document(doc) => assert_eq!(doc["user"]["name"], json!("ann")),
            other => panic!("unexpected data: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_extension() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("data.xlsx");
        fs::write(&path, "binary").unwrap();

        assert!(matches!(
            load_data_file(&path),
            Err(EngineError::DataFormatUnsupported(_))
        ));
    }

    #[test]
    fn test_load_data_ref_file_prefix() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("users.csv"), "user\nann\n").unwrap();

        let data_ref = DataRef::Reference("File:users.csv".to_string());
        let data = load_data_ref(&data_ref, temp_dir.path()).unwrap();
        assert!(matches!(data, TestData::Rows(r) if r.len() == 1));
    }

    #[test]
    fn test_load_data_ref_bare_string_rejected() {
        let data_ref = DataRef::Reference("users.csv".to_string());
        assert!(matches!(
            load_data_ref(&data_ref, Path::new(".")),
            Err(EngineError::DataFormatUnsupported(_))
        ));
    }

    #[test]
    fn test_data_file_path_prefix_optional() {
        let root = Path::new("/data");
        assert_eq!(data_file_path("File:extra.json", root), root.join("extra.json"));
        assert_eq!(data_file_path("extra.json", root), root.join("extra.json"));
    }
}

//! Case Definition Parser
//!
//! Loads case definition documents from files and directories. JSON and
//! YAML documents are both accepted; the case name is the document path
//! relative to the directory it was found under, without extension.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::model::CaseDefinition;
use super::validator::validate_definition;
use crate::config::extension_of;
use crate::error::{EngineError, Result};

/// File extensions recognised as definition documents.
const DEFINITION_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

/// Loads a single case definition document.
///
/// # Example
///
/// ```rust,no_run
/// use caserunner::definition::load_case_definition;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let case = load_case_definition("cases/login.json")?;
///     println!("{} has {} steps", case.name, case.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_case_definition(path: impl AsRef<Path>) -> Result<CaseDefinition> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("case")
        .to_string();
    load_named(path, name)
}

/// Loads every case definition found under the given files or directories.
///
/// Directories are searched recursively in a stable (sorted) order.
/// A path that does not exist, or a directory without any definition
/// documents, is a [`EngineError::DefinitionNotFound`].
pub fn load_case_definitions(paths: &[PathBuf]) -> Result<Vec<CaseDefinition>> {
    let mut cases = Vec::new();

    for path in paths {
        if path.is_file() {
            cases.push(load_case_definition(path)?);
        } else if path.is_dir() {
            let mut files = Vec::new();
            collect_documents(path, &mut files)?;
            if files.is_empty() {
                return Err(EngineError::DefinitionNotFound(format!(
                    "no definition documents under {}",
                    path.display()
                )));
            }
            for file in files {
                let name = relative_name(path, &file);
                cases.push(load_named(&file, name)?);
            }
        } else {
            return Err(EngineError::DefinitionNotFound(path.display().to_string()));
        }
    }

    info!("Loaded {} case definitions", cases.len());
    Ok(cases)
}

fn load_named(path: &Path, name: String) -> Result<CaseDefinition> {
    debug!("Loading case definition: {}", path.display());

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::DefinitionNotFound(path.display().to_string())
        } else {
            EngineError::io(path, e)
        }
    })?;

    let invalid = |reason: String| EngineError::DefinitionInvalid {
        path: path.display().to_string(),
        reason,
    };

    let mut case: CaseDefinition = match extension_of(path).as_deref() {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?
        }
        _ => serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?,
    };

    case.name = name;
    case.source = path.to_path_buf();

    let errors = validate_definition(&case);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(invalid(messages.join("; ")));
    }

    debug!("Case '{}': {} steps", case.name, case.steps.len());
    Ok(case)
}

/// Recursively gathers definition documents, sorted by path.
fn collect_documents(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| EngineError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            collect_documents(&entry, out)?;
        } else if is_definition_document(&entry) {
            out.push(entry);
        }
    }
    Ok(())
}

fn is_definition_document(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| DEFINITION_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// `root/login/basic.json` -> `login/basic`
fn relative_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SIMPLE_CASE: &str =
        r#"{"meta": ["smoke"], "steps": [{"testObject": "core", "name": "log", "using": "msg"}]}"#;

    #[test]
    fn test_load_single_json() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("login.json");
        fs::write(&path, SIMPLE_CASE).unwrap();

        let case = load_case_definition(&path).unwrap();
        assert_eq!(case.name, "login");
        assert_eq!(case.source, path);
        assert_eq!(case.steps.len(), 1);
    }

    #[test]
    fn test_load_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("search.yaml");
        fs::write(
            &path,
            "type: rest\nmeta: [api]\nsteps:\n  - testObject: core\n    name: log\n    using: [a, b]\n",
        )
        .unwrap();

        let case = load_case_definition(&path).unwrap();
        assert_eq!(case.case_type, "rest");
        assert_eq!(case.steps[0].using, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_file() {
        let result = load_case_definition("/nonexistent/case.json");
        assert!(matches!(result, Err(EngineError::DefinitionNotFound(_))));
    }

    #[test]
    fn test_invalid_document() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();

        let result = load_case_definition(&path);
        assert!(matches!(result, Err(EngineError::DefinitionInvalid { .. })));
    }

    #[test]
    fn test_case_without_steps_is_invalid() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("empty.json");
        fs::write(&path, r#"{"steps": []}"#).unwrap();

        let result = load_case_definition(&path);
        assert!(matches!(result, Err(EngineError::DefinitionInvalid { .. })));
    }

    #[test]
    fn test_load_directory_recursive() {
        let temp_dir = tempdir().unwrap();
        let nested = temp_dir.path().join("login");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("a.json"), SIMPLE_CASE).unwrap();
        fs::write(nested.join("basic.json"), SIMPLE_CASE).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let cases = load_case_definitions(&[temp_dir.path().to_path_buf()]).unwrap();
        let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "login/basic"]);
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = tempdir().unwrap();
        let result = load_case_definitions(&[temp_dir.path().to_path_buf()]);
        assert!(matches!(result, Err(EngineError::DefinitionNotFound(_))));
    }

    #[test]
    fn test_missing_path() {
        let result = load_case_definitions(&[PathBuf::from("/nonexistent/cases")]);
        assert!(matches!(result, Err(EngineError::DefinitionNotFound(_))));
    }
}

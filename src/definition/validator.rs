//! Case Definition Validation
//!
//! Structural checks applied to every definition at load time:
//! - The case has at least one step
//! - Every step names a test object and an action
//! - The series number (if any) is well formed
//! - `undo` never points back at the step's own action

use log::{debug, warn};

use super::model::{CaseDefinition, StepDefinition};
use super::series::SeriesNumber;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    NoSteps,
    EmptyTestObject(usize),
    EmptyAction(usize),
    MalformedSeries(String),
    SelfUndo { order: usize, action: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSteps => write!(f, "Case has no steps"),
            Self::EmptyTestObject(order) => write!(f, "Step {} has no test object", order),
            Self::EmptyAction(order) => write!(f, "Step {} has no action name", order),
            Self::MalformedSeries(series) => write!(f, "Malformed series number '{}'", series),
            Self::SelfUndo { order, action } => {
                write!(f, "Step {} uses its own action '{}' as undo", order, action)
            }
        }
    }
}

/// Validates a single step's fields. `order` is 1-based.
fn validate_step(order: usize, step: &StepDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.test_object.trim().is_empty() {
        errors.push(ValidationError::EmptyTestObject(order));
    }

    if step.name.trim().is_empty() {
        errors.push(ValidationError::EmptyAction(order));
    }

    if step.undo.as_deref() == Some(step.name.as_str()) {
        errors.push(ValidationError::SelfUndo {
            order,
            action: step.name.clone(),
        });
    }

    if step.skip_on_error && step.stop_on_error == Some(true) {
        warn!(
            "Step {} ({}.{}): skipOnError overrides stopOnError",
            order, step.test_object, step.name
        );
    }

    errors
}

/// Validates a case definition and returns every problem found.
pub fn validate_definition(case: &CaseDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if case.steps.is_empty() {
        errors.push(ValidationError::NoSteps);
        return errors;
    }

    for (index, step) in case.steps.iter().enumerate() {
        errors.extend(validate_step(index + 1, step));
    }

    if let Some(series) = &case.series_number {
        if series.parse::<SeriesNumber>().is_err() {
            errors.push(ValidationError::MalformedSeries(series.clone()));
        }
    }

    if case.test_case_id.is_some() && !case.test_case_id_map.is_empty() {
        debug!(
            "Case '{}' declares both testCaseId and testCaseIdMap; the map wins per row",
            case.name
        );
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_case() -> CaseDefinition {
        CaseDefinition::new("case", vec![StepDefinition::new("core", "log")])
    }

    #[test]
    fn test_valid_case() {
        assert!(validate_definition(&valid_case()).is_empty());
    }

    #[test]
    fn test_no_steps() {
        let case = CaseDefinition::new("case", vec![]);
        assert_eq!(validate_definition(&case), vec![ValidationError::NoSteps]);
    }

    #[test]
    fn test_empty_fields_collected() {
        let case = CaseDefinition::new(
            "case",
            vec![
                StepDefinition::new("core", "log"),
                StepDefinition::new("", ""),
            ],
        );
        let errors = validate_definition(&case);
        assert_eq!(
            errors,
            vec![ValidationError::EmptyTestObject(2), ValidationError::EmptyAction(2)]
        );
    }

    #[test]
    fn test_malformed_series() {
        let case = valid_case().with_series("1.x");
        assert_eq!(
            validate_definition(&case),
            vec![ValidationError::MalformedSeries("1.x".to_string())]
        );
    }

    #[test]
    fn test_self_undo() {
        let case = CaseDefinition::new(
            "case",
            vec![StepDefinition::new("shop", "addItem").with_undo("addItem")],
        );
        let errors = validate_definition(&case);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("addItem"));
    }
}

//! CaseRunner - Data-Driven Test Case Execution Engine
//!
//! Runs declarative test cases (JSON or YAML documents listing steps) against
//! registered test objects. Each step names a test object, an action and the
//! test data keys bound to the action's parameters. Cases with more than one
//! data row expand into one concrete case per row.
//!
//! # Architecture
//!
//! The library is organized into five main modules:
//!
//! - [`definition`]: Case documents, validation, series numbers and filters
//! - [`data`]: Test data sources and parameter resolution
//! - [`execution`]: Action registry, coordinator and worker pool
//! - [`report`]: Step/case results, reporters and the execution timeline
//! - [`config`]: Run configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use caserunner::config::RunConfig;
//! use caserunner::execution::{ActionRegistry, RunCoordinator};
//! use caserunner::report::ConsoleReporter;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::load("caserunner.yaml")?;
//!
//!     let mut coordinator = RunCoordinator::new(config, ActionRegistry::with_builtins());
//!     coordinator.add_reporter(Arc::new(ConsoleReporter::new(true)));
//!
//!     let report = coordinator.run(&["cases".into()])?;
//!     assert!(report.summary.all_passed());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod data;
pub mod definition;
pub mod error;
pub mod execution;
pub mod report;

// Re-export commonly used types
pub use config::RunConfig;
pub use definition::model::{CaseDefinition, StepDefinition};
pub use definition::parser::{load_case_definition, load_case_definitions};
pub use error::{EngineError, Result};
pub use execution::coordinator::RunCoordinator;
pub use execution::registry::ActionRegistry;
pub use report::result::RunReport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "CaseRunner";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "CaseRunner");
    }

    #[test]
    fn test_module_exports_step() {
        let step = StepDefinition::new("core", "log").with_using("user, password");
        assert_eq!(step.test_object, "core");
        assert_eq!(step.name, "log");
    }

    #[test]
    fn test_module_exports_case() {
        let case = CaseDefinition::new("login", vec![StepDefinition::new("core", "log")]);
        assert_eq!(case.name, "login");
        assert_eq!(case.steps.len(), 1);
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ActionRegistry::with_builtins();
        assert!(registry.public_action("core", "log").is_ok());
    }
}

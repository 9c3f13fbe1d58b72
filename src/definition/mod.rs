//! Case Definition Module
//!
//! Data structures and loading for declarative test case documents.
//!
//! # Structure
//!
//! - [`model`]: Case and step definitions
//! - [`parser`]: JSON/YAML document loading
//! - [`validator`]: Structural validation
//! - [`series`]: Series number ordering
//! - [`filter`]: Tag and data row selection

pub mod filter;
pub mod model;
pub mod parser;
pub mod series;
pub mod validator;

pub use filter::{row_selected, TagFilter};
pub use model::{CaseDefinition, DataRef, StepDefinition, Using};
pub use parser::{load_case_definition, load_case_definitions};
pub use series::SeriesNumber;
pub use validator::{validate_definition, ValidationError};

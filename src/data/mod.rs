//! Test Data Module
//!
//! Loading and resolution of test data for case parameters.
//!
//! - [`resolver`]: Parameter lookup across row, document and global data
//! - [`source`]: CSV, JSON/YAML and SQL loaders
//! - [`global`]: Run-wide global data discovery

pub mod global;
pub mod resolver;
pub mod source;

pub use global::GlobalData;
pub use resolver::DataResolver;
pub use source::{Row, TestData};

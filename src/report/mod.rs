//! Reporting Module
//!
//! Results, reporters and the execution timeline.
//!
//! - [`result`]: Step and case results with the case status rule
//! - [`reporter`]: Reporter and feedback connector traits, console and JSON output
//! - [`timeline`]: Per-worker case timeline

pub mod reporter;
pub mod result;
pub mod timeline;

pub use reporter::{ConsoleReporter, FeedbackConnector, JsonReportWriter, Reporter, Reporters};
pub use result::{CaseResult, RunReport, RunSummary, StepResult, StepStatus};
pub use timeline::{EventType, ExecutionTimeline};

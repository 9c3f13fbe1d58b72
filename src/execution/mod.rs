//! Case Execution Module
//!
//! Provides the run coordinator, the action registry and the per-case and
//! per-step execution units.
//!
//! # Architecture
//!
//! - [`coordinator`]: Loads and expands cases, dispatches batches to workers
//! - [`case`]: One concrete case: session lifecycle, hooks, feedback
//! - [`step`]: One step: binding, invocation, status mapping, undo
//! - [`registry`]: Test objects and their public/private actions
//! - [`builtin`]: The `core` test object
//! - [`monitor`]: Worker context and shared run bookkeeping
//! - [`session`]: Driver session abstraction and artifact capture
//! - [`state`]: Persisted retry points

pub mod builtin;
pub mod case;
pub mod coordinator;
pub mod monitor;
pub mod registry;
pub mod session;
pub mod state;
pub mod step;

pub use case::{CaseServices, CaseUnit};
pub use coordinator::RunCoordinator;
pub use monitor::{ExecutionContext, ExecutionMonitor};
pub use registry::{
    ActionContext, ActionError, ActionInfo, ActionLibrary, ActionRegistry, ActionResult,
    FailureKind, ObjectName, ParamShape, TestObject, TestObjectBuilder,
};
pub use session::{
    ArtifactCapture, MemorySession, MemorySessionFactory, NoCapture, Session, SessionError,
    SessionFactory, SessionOptions, SessionSnapshot,
};
pub use state::{RetryPoint, RetryStore};
pub use step::StepUnit;

//! Action Registry
//!
//! Maps `(testObject, action)` pairs to callables. Test objects are
//! declared with a typed [`TestObjectBuilder`] and stored type-erased as
//! [`ObjectRegistration`]s. Libraries contribute their objects through
//! [`ActionLibrary`] at startup; nothing is discovered at runtime.
//!
//! One instance of each test object is created lazily per case and kept
//! in an [`ObjectCache`] until the case finishes.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::Value;

use super::session::Session;
use crate::error::{EngineError, Result};

/// How an action failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Triaged failure: the step is BROKEN and the case keeps going
    KnownIssue,
    Hard,
}

/// Failure returned by an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionError {
    pub kind: FailureKind,
    pub message: String,
}

impl ActionError {
    pub fn hard(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Hard,
            message: message.into(),
        }
    }

    pub fn known_issue(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::KnownIssue,
            message: message.into(),
        }
    }

    pub fn is_known_issue(&self) -> bool {
        self.kind == FailureKind::KnownIssue
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::KnownIssue => write!(f, "Known issue: {}", self.message),
            FailureKind::Hard => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<super::session::SessionError> for ActionError {
    fn from(err: super::session::SessionError) -> Self {
        ActionError::hard(err.0)
    }
}

pub type ActionResult = std::result::Result<(), ActionError>;

/// What an action sees while it runs: the case's session and a log.
pub struct ActionContext<'a> {
    case_name: &'a str,
    session: &'a mut Option<Box<dyn Session>>,
    log: Vec<String>,
}

impl<'a> ActionContext<'a> {
    pub fn new(case_name: &'a str, session: &'a mut Option<Box<dyn Session>>) -> Self {
        Self {
            case_name,
            session,
            log: Vec::new(),
        }
    }

    pub fn case_name(&self) -> &str {
        self.case_name
    }

    /// The live session; actions that need one fail without it.
    pub fn session(&mut self) -> std::result::Result<&mut dyn Session, ActionError> {
        let session: &mut dyn Session = match self.session.as_deref_mut() {
            Some(session) => session,
            None => return Err(ActionError::hard("No active session")),
        };
        Ok(session)
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn into_log(self) -> Vec<String> {
        self.log
    }
}

/// Parameter shape an action accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
    /// Exactly this many positional parameters
    Fixed(usize),
    /// Any number; a single bound list is spread element-wise
    Variadic,
}

impl ParamShape {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            ParamShape::Fixed(expected) => *expected == count,
            ParamShape::Variadic => true,
        }
    }
}

/// Registry metadata for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionInfo {
    pub public: bool,
    pub shape: ParamShape,
}

/// Name under which a test object is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectName {
    Declared(String),
    /// Only inherits its parent's name; never registered
    Inherited(String),
}

impl ObjectName {
    /// The usable registration name, if any.
    pub fn declared(&self) -> Option<&str> {
        match self {
            ObjectName::Declared(name) if !name.trim().is_empty() => Some(name.trim()),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectName::Declared(name) => write!(f, "{}", name),
            ObjectName::Inherited(parent) => write!(f, "<inherited from {}>", parent),
        }
    }
}

/// A live test object instance.
pub trait TestObject: Send {
    fn invoke(&mut self, action: &str, ctx: &mut ActionContext<'_>, args: &[Value]) -> ActionResult;
}

/// Invokes `action`, turning a panic inside it into a hard failure.
pub fn invoke_contained(
    object: &mut dyn TestObject,
    action: &str,
    ctx: &mut ActionContext<'_>,
    args: &[Value],
) -> ActionResult {
    panic::catch_unwind(AssertUnwindSafe(|| object.invoke(action, ctx, args))).unwrap_or_else(
        |payload| {
            let message = panic_message(payload.as_ref());
            error!("Action '{}' of '{}' panicked: {}", action, ctx.case_name(), message);
            Err(ActionError::hard(format!("Action '{}' panicked: {}", action, message)))
        },
    )
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

type Handler<T> =
    Arc<dyn Fn(&mut T, &mut ActionContext<'_>, &[Value]) -> ActionResult + Send + Sync>;

struct ActionEntry<T> {
    info: ActionInfo,
    handler: Handler<T>,
}

struct BoundObject<T> {
    state: T,
    actions: Arc<BTreeMap<String, ActionEntry<T>>>,
}

impl<T: Send> TestObject for BoundObject<T> {
    fn invoke(&mut self, action: &str, ctx: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
        let entry = self
            .actions
            .get(action)
            .ok_or_else(|| ActionError::hard(format!("Unknown action '{}'", action)))?;
        (entry.handler)(&mut self.state, ctx, args)
    }
}

/// Declares a test object whose instances carry state `T`.
///
/// # Example
///
/// ```
/// use caserunner::execution::registry::{ActionRegistry, ParamShape, TestObjectBuilder};
///
/// let counter = TestObjectBuilder::new("counter", || 0u32)
///     .action("bump", ParamShape::Fixed(0), |count, ctx, _| {
///         *count += 1;
///         ctx.log(format!("count = {}", count));
///         Ok(())
///     })
///     .build();
///
/// let mut registry = ActionRegistry::new();
/// registry.register(counter);
/// assert!(registry.public_action("counter", "bump").is_ok());
/// ```
pub struct TestObjectBuilder<T> {
    name: ObjectName,
    factory: Arc<dyn Fn() -> T + Send + Sync>,
    actions: BTreeMap<String, ActionEntry<T>>,
}

impl<T: Send + 'static> TestObjectBuilder<T> {
    pub fn new(name: impl Into<String>, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::named(ObjectName::Declared(name.into()), factory)
    }

    pub fn named(name: ObjectName, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            name,
            factory: Arc::new(factory),
            actions: BTreeMap::new(),
        }
    }

    /// Adds a public action.
    pub fn action<F>(self, name: &str, shape: ParamShape, handler: F) -> Self
    where
        F: Fn(&mut T, &mut ActionContext<'_>, &[Value]) -> ActionResult + Send + Sync + 'static,
    {
        self.add(name, ActionInfo { public: true, shape }, Arc::new(handler))
    }

    /// Adds an action usable as undo or hook but not from steps.
    pub fn private_action<F>(self, name: &str, shape: ParamShape, handler: F) -> Self
    where
        F: Fn(&mut T, &mut ActionContext<'_>, &[Value]) -> ActionResult + Send + Sync + 'static,
    {
        self.add(name, ActionInfo { public: false, shape }, Arc::new(handler))
    }

    fn add(mut self, name: &str, info: ActionInfo, handler: Handler<T>) -> Self {
        self.actions
            .insert(name.trim().to_string(), ActionEntry { info, handler });
        self
    }

    pub fn build(self) -> ObjectRegistration {
        let infos = self
            .actions
            .iter()
            .map(|(name, entry)| (name.clone(), entry.info))
            .collect();
        let actions = Arc::new(self.actions);
        let factory = self.factory;

        ObjectRegistration {
            name: self.name,
            actions: infos,
            factory: Box::new(move || {
                Box::new(BoundObject {
                    state: factory(),
                    actions: Arc::clone(&actions),
                }) as Box<dyn TestObject>
            }),
        }
    }
}

/// A type-erased test object declaration.
pub struct ObjectRegistration {
    name: ObjectName,
    actions: BTreeMap<String, ActionInfo>,
    factory: Box<dyn Fn() -> Box<dyn TestObject> + Send + Sync>,
}

impl ObjectRegistration {
    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    pub fn actions(&self) -> impl Iterator<Item = (&str, &ActionInfo)> {
        self.actions.iter().map(|(name, info)| (name.as_str(), info))
    }
}

/// Registration point for a set of test objects.
pub trait ActionLibrary {
    fn register(&self, registry: &mut ActionRegistry);
}

/// All registered test objects.
#[derive(Default)]
pub struct ActionRegistry {
    objects: HashMap<String, ObjectRegistration>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `core` object.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_library(&super::builtin::CoreLibrary);
        registry
    }

    /// Registers an object. Objects without a declared name are rejected.
    pub fn register(&mut self, registration: ObjectRegistration) {
        let Some(name) = registration.name.declared().map(str::to_string) else {
            warn!(
                "Test object {} has no name of its own - not registered",
                registration.name
            );
            return;
        };

        if self.objects.contains_key(&name) {
            warn!("Test object '{}' registered twice - keeping the latest", name);
        }
        debug!(
            "Registered test object '{}' ({} actions)",
            name,
            registration.actions.len()
        );
        self.objects.insert(name, registration);
    }

    pub fn register_library(&mut self, library: &dyn ActionLibrary) {
        library.register(self);
    }

    pub fn contains(&self, object: &str) -> bool {
        self.objects.contains_key(object)
    }

    pub fn object_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.objects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Looks up an action regardless of visibility.
    pub fn action(&self, object: &str, action: &str) -> Result<ActionInfo> {
        self.objects
            .get(object)
            .and_then(|registration| registration.actions.get(action))
            .copied()
            .ok_or_else(|| EngineError::ActionNotFound {
                object: object.to_string(),
                action: action.to_string(),
            })
    }

    /// Looks up an action callable from a step.
    pub fn public_action(&self, object: &str, action: &str) -> Result<ActionInfo> {
        let info = self.action(object, action)?;
        if !info.public {
            return Err(EngineError::ActionNotPublic {
                object: object.to_string(),
                action: action.to_string(),
            });
        }
        Ok(info)
    }

    /// Creates a fresh instance of a test object.
    pub fn instantiate(&self, object: &str) -> Result<Box<dyn TestObject>> {
        let registration = self.objects.get(object).ok_or_else(|| EngineError::ActionNotFound {
            object: object.to_string(),
            action: String::new(),
        })?;
        Ok((registration.factory)())
    }
}

/// Test object instances of one case, created on first use.
pub struct ObjectCache {
    registry: Arc<ActionRegistry>,
    instances: HashMap<String, Box<dyn TestObject>>,
}

impl ObjectCache {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            instances: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn get(&mut self, object: &str) -> Result<&mut Box<dyn TestObject>> {
        if !self.instances.contains_key(object) {
            let instance = self.registry.instantiate(object)?;
            debug!("Instantiated test object '{}'", object);
            self.instances.insert(object.to_string(), instance);
        }
        self.instances
            .get_mut(object)
            .ok_or_else(|| EngineError::ActionNotFound {
                object: object.to_string(),
                action: String::new(),
            })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn clear(&mut self) {
        self.instances.clear();
    }
}

//! Driver Sessions and Artifact Capture
//!
//! Concrete drivers (browsers, HTTP clients, ...) live outside the engine
//! behind [`Session`] and [`SessionFactory`]. [`MemorySession`] is the
//! built-in driver: it tracks the current URL and a cookie jar, which is
//! all the retry snapshot needs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a session driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct SessionError(pub String);

/// Options a session is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Case type the session serves (web, rest, ...)
    pub case_type: String,
    pub headless: bool,
}

impl SessionOptions {
    pub fn new(case_type: impl Into<String>) -> Self {
        Self {
            case_type: case_type.into(),
            headless: true,
        }
    }
}

/// Restorable session state saved with a retry point.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub cookies: BTreeMap<String, String>,
    pub url: Option<String>,
}

/// A live driver session owned by one worker.
pub trait Session: Send {
    fn id(&self) -> &str;

    fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    fn current_url(&self) -> Option<String>;

    fn cookies(&self) -> BTreeMap<String, String>;

    fn set_cookie(&mut self, name: &str, value: &str);

    fn clear_cookies(&mut self);

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            cookies: self.cookies(),
            url: self.current_url(),
        }
    }

    /// Replaces cookies with the snapshot's and reopens its URL.
    fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        self.clear_cookies();
        for (name, value) in &snapshot.cookies {
            self.set_cookie(name, value);
        }
        if let Some(url) = &snapshot.url {
            self.navigate(url)?;
        }
        Ok(())
    }
}

/// Opens sessions for cases.
pub trait SessionFactory: Send + Sync {
    fn open(&self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError>;
}

/// In-memory session with a URL and a cookie jar.
#[derive(Debug, Clone)]
pub struct MemorySession {
    id: String,
    headless: bool,
    url: Option<String>,
    cookies: BTreeMap<String, String>,
    open: bool,
}

impl MemorySession {
    pub fn new(id: impl Into<String>, headless: bool) -> Self {
        Self {
            id: id.into(),
            headless,
            url: None,
            cookies: BTreeMap::new(),
            open: true,
        }
    }

    pub fn headless(&self) -> bool {
        self.headless
    }
}

impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        if !self.open {
            return Err(SessionError(format!("Session {} is closed", self.id)));
        }
        let url = url.trim();
        if !url.contains("://") && !url.starts_with("about:") {
            return Err(SessionError(format!("Malformed URL '{}'", url)));
        }
        debug!("[{}] navigate {}", self.id, url);
        self.url = Some(url.to_string());
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    fn cookies(&self) -> BTreeMap<String, String> {
        self.cookies.clone()
    }

    fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    fn clear_cookies(&mut self) {
        self.cookies.clear();
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Opens numbered [`MemorySession`]s.
#[derive(Debug, Default)]
pub struct MemorySessionFactory {
    opened: AtomicUsize,
}

impl MemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl SessionFactory for MemorySessionFactory {
    fn open(&self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError> {
        let number = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{}", options.case_type, number);
        debug!("Opened session {} (headless: {})", id, options.headless);
        Ok(Box::new(MemorySession::new(id, options.headless)))
    }
}

/// Screenshot and recording capture.
pub trait ArtifactCapture: Send + Sync {
    /// Takes a screenshot and returns a reference to the stored artifact.
    fn screenshot(&self, session: Option<&dyn Session>, case_name: &str, step: usize)
        -> Option<String>;

    fn start_recording(&self, _session: Option<&dyn Session>, _case_name: &str) {}

    /// Stops the case recording; the reference becomes a case attachment.
    fn stop_recording(&self, _case_name: &str) -> Option<String> {
        None
    }
}

/// Capture that never produces artifacts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

impl ArtifactCapture for NoCapture {
    fn screenshot(&self, _: Option<&dyn Session>, _: &str, _: usize) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_session_navigation() {
        let mut session = MemorySession::new("web-1", true);
        session.navigate("https://example.test/login").unwrap();
        assert_eq!(session.current_url().as_deref(), Some("https://example.test/login"));

        assert!(session.navigate("not a url").is_err());
        session.close();
        assert!(session.navigate("https://example.test").is_err());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut first = MemorySession::new("web-1", true);
        first.set_cookie("sid", "abc");
        first.navigate("https://example.test/cart").unwrap();
        let snapshot = first.snapshot();

        let mut second = MemorySession::new("web-2", true);
        second.set_cookie("stale", "1");
        second.restore(&snapshot).unwrap();

        assert_eq!(second.cookies(), snapshot.cookies);
        assert_eq!(second.current_url(), snapshot.url);
    }

    #[test]
    fn test_restore_with_bad_url_fails() {
        let snapshot = SessionSnapshot {
            cookies: BTreeMap::new(),
            url: Some("broken".into()),
        };
        let mut session = MemorySession::new("web-1", true);
        assert!(session.restore(&snapshot).is_err());
    }

    #[test]
    fn test_factory_numbers_sessions() {
        let factory = MemorySessionFactory::new();
        let mut options = SessionOptions::new("web");
        options.headless = false;

        let first = factory.open(&options).unwrap();
        let second = factory.open(&options).unwrap();
        assert_eq!(first.id(), "web-1");
        assert_eq!(second.id(), "web-2");
        assert_eq!(factory.opened(), 2);
    }
}

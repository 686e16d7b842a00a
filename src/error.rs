//! Engine error taxonomy.
//!
//! Setup failures are fatal and propagate; element-resolution failures carry
//! the selector so callers can retry or abort a scripted flow; proxy-file
//! parse errors never reach this type (they are skipped at the parse site).

use thiserror::Error;

/// Errors raised by the stealth engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Browser binary failed to start or the profile path is unusable.
    #[error("browser setup failed: {0}")]
    Setup(String),

    /// A selector matched no element in the page.
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// A selector matched an element with no usable bounding box
    /// (e.g. `display:none`).
    #[error("element not interactable: {selector}")]
    NotInteractable { selector: String },

    /// An operation that requires a page was called before `new_page()`.
    #[error("no active page")]
    NoActivePage,

    /// Navigation failed (bad URL, proxy refused the connection, timeout).
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// A wait-for-selector deadline elapsed.
    #[error("timed out after {timeout_ms}ms waiting for {selector}")]
    Timeout { selector: String, timeout_ms: u64 },

    /// A raw CDP command failed.
    #[error("cdp command failed: {0}")]
    Cdp(String),

    /// Proxy-file persistence failed (best-effort, logged by callers).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for wrapping a chromiumoxide error as a CDP failure.
    pub fn cdp(err: impl std::fmt::Display) -> Self {
        Self::Cdp(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

//! Capture Browser Error Types

use capture_core::CaptureError;
use thiserror::Error;

/// Main error type for browser-side capture
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("Browser connection failed: {0}")]
    BrowserConnection(String),

    #[error("Page navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Payload installation failed: {0}")]
    Install(String),

    #[error("Script execution failed: {0}")]
    Script(String),

    #[error("DevTools protocol error: {0}")]
    Protocol(String),

    #[error("Timeout waiting for {condition}: {details}")]
    Timeout { condition: String, details: String },

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BrowserError> for CaptureError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Capture(inner) => inner,
            other => CaptureError::Trigger(other.to_string()),
        }
    }
}

/// Result type alias for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

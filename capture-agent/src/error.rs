//! Agent error types

use capture_browser::BrowserError;
use capture_core::CaptureError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;

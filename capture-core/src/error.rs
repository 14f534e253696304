//! Error types for capture operations

use thiserror::Error;

/// Main error type for the capture core
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A matched response body could not be decoded as JSON.
    ///
    /// Never recovered: a malformed capture means the intercept rule or the
    /// assumptions about the remote service are wrong.
    #[error("Decode failed for {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Unknown network call: {id}")]
    UnknownCall { id: String },

    #[error("Invalid transition for call {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: crate::hook::CallPhase,
        to: crate::hook::CallPhase,
    },

    #[error("Body retrieval failed for {id}: {reason}")]
    BodyUnavailable { id: String, reason: String },

    #[error("Trigger activation failed: {0}")]
    Trigger(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Build a decode failure for the given URL.
    pub fn decode(url: impl Into<String>, reason: impl ToString) -> Self {
        CaptureError::Decode {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error belongs to the "fail loud" class.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, CaptureError::Decode { .. })
    }
}

/// Result type alias for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

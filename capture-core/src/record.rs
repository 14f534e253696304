//! Captured records and response decoding

use crate::error::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded response body plus the URL it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRecord {
    pub url: String,
    pub body: Value,
}

impl CapturedRecord {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            body,
        }
    }
}

/// Raw response as handed over by the request primitive.
///
/// The variant follows the primitive's response-type contract:
/// `""`/`"text"` bodies are text, `"blob"`/`"arraybuffer"` bodies are bytes
/// that need a text-decoding step, and `"json"` bodies arrive already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Text(String),
    Binary(Vec<u8>),
    Structured(Value),
    /// Response types with no JSON reading (e.g. `"document"`)
    Unsupported(String),
}

impl ResponsePayload {
    /// Whether reading this payload goes through the asynchronous text step.
    pub fn needs_text_decoding(&self) -> bool {
        matches!(self, ResponsePayload::Binary(_))
    }

    /// Structurally decode the payload as JSON.
    pub fn decode(&self, url: &str) -> CaptureResult<Value> {
        match self {
            ResponsePayload::Text(text) => {
                serde_json::from_str(text).map_err(|e| CaptureError::decode(url, e))
            }
            ResponsePayload::Binary(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| CaptureError::decode(url, format!("invalid UTF-8: {}", e)))?;
                serde_json::from_str(text).map_err(|e| CaptureError::decode(url, e))
            }
            // the primitive reports a failed JSON parse as null
            ResponsePayload::Structured(Value::Null) => {
                Err(CaptureError::decode(url, "structured response is null"))
            }
            ResponsePayload::Structured(value) => Ok(value.clone()),
            ResponsePayload::Unsupported(kind) => Err(CaptureError::decode(
                url,
                format!("response type '{}' cannot be read as JSON", kind),
            )),
        }
    }
}

//! Network Hook
//!
//! Tracks every asynchronous network call the page issues and, for calls that
//! match the intercept rule, delivers a decoded copy of the completed response
//! to the [`ResponseBuffer`] before any caller-registered completion handler
//! runs.
//!
//! Per-call lifecycle:
//!
//! ```text
//! created -> configured -> dispatched -> { pending (repeats) -> complete }
//! ```
//!
//! The hook only acts at the `complete` transition, and only for calls that
//! matched at dispatch time.

use crate::buffer::ResponseBuffer;
use crate::error::{CaptureError, CaptureResult};
use crate::record::{CapturedRecord, ResponsePayload};
use crate::rule::{resolve_target, InterceptRule};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, trace};
use url::Url;

/// Phase of a single network call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Created,
    Configured,
    Dispatched,
    Pending,
    Complete,
}

/// A call that reached its terminal state
#[derive(Debug, Clone)]
pub struct CompletedCall {
    pub id: String,
    pub method: String,
    /// Target as configured by the page (possibly relative)
    pub target: String,
    /// Absolute URL, when the target resolved against the document origin
    pub url: Option<Url>,
    /// Whether the call matched the intercept rule at dispatch time
    pub intercepted: bool,
    /// Response body; only read for intercepted calls
    pub payload: Option<ResponsePayload>,
}

/// Reads the body of a completed call
#[async_trait]
pub trait BodySource: Send + Sync {
    async fn read_body(&self, call_id: &str) -> CaptureResult<ResponsePayload>;
}

/// Observer invoked when a call completes
#[async_trait]
pub trait CompletionObserver: Send + Sync {
    async fn on_complete(&self, call: &CompletedCall) -> CaptureResult<()>;
}

/// Decodes intercepted responses and appends them to the buffer
#[derive(Debug, Clone)]
pub struct CaptureObserver {
    buffer: ResponseBuffer,
}

impl CaptureObserver {
    pub fn new(buffer: ResponseBuffer) -> Self {
        Self { buffer }
    }
}

#[async_trait]
impl CompletionObserver for CaptureObserver {
    async fn on_complete(&self, call: &CompletedCall) -> CaptureResult<()> {
        let (Some(url), Some(payload)) = (&call.url, &call.payload) else {
            return Ok(());
        };
        if payload.needs_text_decoding() {
            trace!("Decoding binary body for {}", url);
        }
        let body = payload.decode(url.as_str())?;
        self.buffer
            .append(CapturedRecord::new(url.as_str(), body))
            .await;
        Ok(())
    }
}

struct TrackedCall {
    method: String,
    target: String,
    phase: CallPhase,
    url: Option<Url>,
    intercepted: bool,
    observers: Vec<Arc<dyn CompletionObserver>>,
}

impl TrackedCall {
    fn transition(&mut self, id: &str, allowed: &[CallPhase], to: CallPhase) -> CaptureResult<()> {
        if !allowed.contains(&self.phase) {
            return Err(CaptureError::InvalidTransition {
                id: id.to_string(),
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}

/// Wrapper around the page's request primitive
pub struct NetworkHook {
    rule: InterceptRule,
    origin: Option<Url>,
    capture: Arc<CaptureObserver>,
    buffer: ResponseBuffer,
    handlers: Vec<Arc<dyn CompletionObserver>>,
    calls: HashMap<String, TrackedCall>,
}

impl NetworkHook {
    pub fn new(rule: InterceptRule, buffer: ResponseBuffer) -> Self {
        Self {
            rule,
            origin: None,
            capture: Arc::new(CaptureObserver::new(buffer.clone())),
            buffer,
            handlers: Vec::new(),
            calls: HashMap::new(),
        }
    }

    /// Set the document origin used to resolve relative targets
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn rule(&self) -> &InterceptRule {
        &self.rule
    }

    pub fn buffer(&self) -> &ResponseBuffer {
        &self.buffer
    }

    /// Register a completion handler attached to every call opened afterwards
    pub fn add_completion_handler(&mut self, handler: Arc<dyn CompletionObserver>) {
        self.handlers.push(handler);
    }

    /// The document was replaced: drop in-flight calls and adopt the new origin.
    ///
    /// Returns the number of calls that were dropped.
    pub fn replace_document(&mut self, origin: Option<Url>) -> usize {
        let dropped = self.calls.len();
        self.calls.clear();
        self.origin = origin;
        dropped
    }

    /// Create (if needed) and configure a call with method and target.
    ///
    /// Re-opening an existing call resets it to `configured`.
    pub fn open(&mut self, id: &str, method: &str, target: &str) {
        trace!("open {} {} {}", id, method, target);
        let call = self.calls.entry(id.to_string()).or_insert_with(|| TrackedCall {
            method: String::new(),
            target: String::new(),
            phase: CallPhase::Created,
            url: None,
            intercepted: false,
            observers: Vec::new(),
        });
        call.method = method.to_string();
        call.target = target.to_string();
        call.url = None;
        call.intercepted = false;
        call.observers = self.handlers.clone();
        call.phase = CallPhase::Configured;
    }

    /// Register a handler on one call, after any already registered.
    pub fn on_complete(&mut self, id: &str, handler: Arc<dyn CompletionObserver>) -> CaptureResult<()> {
        let call = self
            .calls
            .get_mut(id)
            .ok_or_else(|| CaptureError::UnknownCall { id: id.to_string() })?;
        call.observers.push(handler);
        Ok(())
    }

    /// Dispatch a configured call.
    ///
    /// Returns whether the call matched the intercept rule; matching calls get
    /// the capture observer placed ahead of every other handler.
    pub fn send(&mut self, id: &str) -> CaptureResult<bool> {
        let call = self
            .calls
            .get_mut(id)
            .ok_or_else(|| CaptureError::UnknownCall { id: id.to_string() })?;
        call.transition(id, &[CallPhase::Configured], CallPhase::Dispatched)?;

        call.url = match &self.origin {
            Some(origin) => resolve_target(origin, &call.target),
            None => Url::parse(&call.target).ok(),
        };
        call.intercepted = call
            .url
            .as_ref()
            .map(|url| self.rule.matches_url(url))
            .unwrap_or(false);

        if call.intercepted {
            debug!("Intercepting {} {}", call.method, call.target);
            call.observers.insert(0, self.capture.clone());
        }
        Ok(call.intercepted)
    }

    /// Readiness changed without completing.
    pub fn progress(&mut self, id: &str) -> CaptureResult<()> {
        let call = self
            .calls
            .get_mut(id)
            .ok_or_else(|| CaptureError::UnknownCall { id: id.to_string() })?;
        call.transition(id, &[CallPhase::Dispatched, CallPhase::Pending], CallPhase::Pending)
    }

    /// The call reached its terminal state.
    ///
    /// Intercepted calls have their body read and captured first; every
    /// registered handler then runs in order, even when capture failed. The
    /// first failure is returned so that it surfaces to the caller.
    pub async fn complete(&mut self, id: &str, source: &dyn BodySource) -> CaptureResult<bool> {
        self.calls
            .get_mut(id)
            .ok_or_else(|| CaptureError::UnknownCall { id: id.to_string() })?
            .transition(id, &[CallPhase::Dispatched, CallPhase::Pending], CallPhase::Complete)?;
        let Some(call) = self.calls.remove(id) else {
            return Err(CaptureError::UnknownCall { id: id.to_string() });
        };

        let mut failure = None;
        let payload = if call.intercepted {
            match source.read_body(id).await {
                Ok(payload) => Some(payload),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            }
        } else {
            None
        };

        let completed = CompletedCall {
            id: id.to_string(),
            method: call.method,
            target: call.target,
            url: call.url,
            intercepted: call.intercepted,
            payload,
        };

        for observer in &call.observers {
            if let Err(e) = observer.on_complete(&completed).await {
                error!("Completion observer failed for {}: {}", completed.target, e);
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(completed.intercepted),
        }
    }

    /// The call failed natively (network error, abort); nothing is captured.
    pub fn abandon(&mut self, id: &str) -> bool {
        self.calls.remove(id).is_some()
    }

    pub fn phase(&self, id: &str) -> Option<CallPhase> {
        self.calls.get(id).map(|call| call.phase)
    }

    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

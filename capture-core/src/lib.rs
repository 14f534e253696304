//! Capture Core Library
//!
//! This library provides the browser-independent half of the response capture
//! engine: the intercept rule, the response buffer, the network hook state
//! machine, the environment overrides, the scrape trigger and the rendered
//! in-page payload that ties them together.

/// Configuration types and utilities
pub mod config;

/// Error types for capture operations
pub mod error;

pub mod buffer;
pub mod hook;
pub mod installer;
pub mod overrides;
pub mod record;
pub mod rule;
pub mod trigger;

pub use buffer::ResponseBuffer;
pub use config::{CaptureConfig, CaptureMode, FingerprintConfig, InstallStrategy, ScheduleConfig};
pub use error::{CaptureError, CaptureResult};
pub use hook::{
    BodySource, CallPhase, CaptureObserver, CompletedCall, CompletionObserver, NetworkHook,
};
pub use installer::{EngineStatus, Installer, Payload};
pub use overrides::{EnvironmentOverride, FingerprintMismatch, FingerprintReport, OverrideRegistry};
pub use record::{CapturedRecord, ResponsePayload};
pub use rule::InterceptRule;
pub use trigger::{ScrapeTrigger, TriggerControl, TriggerOutcome};

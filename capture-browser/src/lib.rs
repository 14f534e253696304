//! Capture Browser - stealth Chromium driver for response capture
//!
//! This crate runs the capture engine from `capture-core` against a real
//! Chromium tab. Use cases include:
//!
//! - **In-page capture**: the payload hooks the page's request primitive and
//!   buffers matching JSON responses inside the document
//! - **Protocol capture**: DevTools network events drive the same hook
//!   host-side, leaving the page's request primitive untouched
//! - **Fingerprint checks**: read the overridden environment values back
//!
//! ## Example
//!
//! ```rust,ignore
//! use capture_browser::{BrowserManager, BrowserOptions, CaptureSession};
//!
//! let manager = BrowserManager::new();
//! manager.launch(BrowserOptions::default()).await?;
//! let session = CaptureSession::open(&manager, CaptureConfig::default()).await?;
//! session.trigger().await?;
//! let records = session.snapshot().await?;
//! ```

pub mod engine;
pub mod error;

// Re-exports
pub use engine::browser::{BrowserManager, BrowserOptions, ManagedBrowser, ProxyConfig};
pub use engine::network::{CdpBodySource, NetworkPump};
pub use engine::page::{NavigationRetry, PageController};
pub use engine::session::CaptureSession;
pub use error::{BrowserError, BrowserResult};

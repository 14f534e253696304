//! Scrape Trigger
//!
//! Starts a capture pass: clears the buffer and activates the page control
//! that makes the page issue the calls the intercept rule cares about.

use crate::buffer::ResponseBuffer;
use crate::error::CaptureResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Access to the page's UI controls
#[async_trait]
pub trait TriggerControl: Send + Sync {
    type Handle: Send;

    /// Find a control by element id; `None` when it is not in the document.
    async fn locate(&self, control_id: &str) -> CaptureResult<Option<Self::Handle>>;

    /// Programmatically activate (click) a located control.
    async fn activate(&self, handle: Self::Handle) -> CaptureResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerOutcome {
    Activated,
    /// The control does not exist (yet); nothing was changed
    ControlMissing,
}

impl TriggerOutcome {
    pub fn from_activated(activated: bool) -> Self {
        if activated {
            TriggerOutcome::Activated
        } else {
            TriggerOutcome::ControlMissing
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeTrigger {
    buffer: ResponseBuffer,
    control_id: String,
}

impl ScrapeTrigger {
    pub fn new(buffer: ResponseBuffer, control_id: impl Into<String>) -> Self {
        Self {
            buffer,
            control_id: control_id.into(),
        }
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }

    /// Reset the buffer and activate the control.
    ///
    /// A missing control is a no-op: the buffer keeps its contents and the
    /// caller retries on a later page event.
    pub async fn run<C>(&self, control: &C) -> CaptureResult<TriggerOutcome>
    where
        C: TriggerControl + ?Sized,
    {
        let Some(handle) = control.locate(&self.control_id).await? else {
            debug!("Trigger control '{}' not present", self.control_id);
            return Ok(TriggerOutcome::ControlMissing);
        };

        self.buffer.reset().await;
        control.activate(handle).await?;
        info!("Activated trigger control '{}'", self.control_id);
        Ok(TriggerOutcome::Activated)
    }
}

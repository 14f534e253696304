//! Page Controller Module
//!
//! Manages navigation, payload installation and script evaluation on the
//! captured page.

use crate::error::{BrowserError, BrowserResult};
use async_trait::async_trait;
use capture_core::installer::{RUN_EXPRESSION, SNAPSHOT_EXPRESSION, STATUS_EXPRESSION};
use capture_core::{
    CaptureResult, CapturedRecord, EngineStatus, FingerprintReport, InstallStrategy,
    OverrideRegistry, Payload, TriggerControl, TriggerOutcome,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Element, Page};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Navigation retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationRetry {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for NavigationRetry {
    fn default() -> Self {
        Self {
            max_retries: 7,
            delay: Duration::from_secs(2),
        }
    }
}

/// Whether two locations name the same page, ignoring one trailing slash
pub fn same_location(current: &str, target: &str) -> bool {
    current.strip_suffix('/').unwrap_or(current) == target.strip_suffix('/').unwrap_or(target)
}

/// Page controller for the captured tab
pub struct PageController {
    page: Page,
    default_timeout: Duration,
    retry: NavigationRetry,
}

impl PageController {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            default_timeout: DEFAULT_TIMEOUT,
            retry: NavigationRetry::default(),
        }
    }

    /// Set default timeout for operations
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: NavigationRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Get the underlying page
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigate to a URL once
    pub async fn navigate(&self, url: &str) -> BrowserResult<()> {
        info!("Navigating to: {}", url);

        tokio::time::timeout(self.default_timeout, self.page.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout {
                condition: "navigation".to_string(),
                details: url.to_string(),
            })?
            .map_err(|e| BrowserError::Navigation(format!("Failed to navigate to {}: {}", url, e)))?;

        Ok(())
    }

    /// Navigate unless already there, retrying failed attempts.
    ///
    /// Returns `false` when the page was already on the target.
    pub async fn navigate_to(&self, url: &str) -> BrowserResult<bool> {
        if let Ok(current) = self.get_url().await {
            if same_location(&current, url) {
                debug!("Already on {}, skipping navigation", url);
                return Ok(false);
            }
        }

        let mut attempt = 0;
        loop {
            match self.navigate(url).await {
                Ok(()) => return Ok(true),
                Err(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        "Navigation failed (retry {}/{}): {}",
                        attempt, self.retry.max_retries, e
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn reload(&self) -> BrowserResult<()> {
        info!("Reloading page");
        self.page
            .reload()
            .await
            .map_err(|e| BrowserError::Navigation(format!("Reload failed: {}", e)))?;
        Ok(())
    }

    /// Get current page URL
    pub async fn get_url(&self) -> BrowserResult<String> {
        let result = self
            .page
            .evaluate("window.location.href")
            .await
            .map_err(|e| BrowserError::Navigation(format!("Failed to get URL: {}", e)))?;

        result
            .into_value::<String>()
            .map_err(|e| BrowserError::Navigation(format!("Failed to parse URL: {}", e)))
    }

    /// Execute JavaScript and return result
    pub async fn execute_script(&self, script: &str) -> BrowserResult<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;

        // undefined/void comes back as null
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    /// Install the payload with the given strategy.
    ///
    /// `NewDocument` registers it for every future document and must happen
    /// before navigation; `HeadScript` inserts it into the current document
    /// and has to be repeated after each navigation.
    pub async fn install(&self, payload: &Payload, strategy: InstallStrategy) -> BrowserResult<()> {
        match strategy {
            InstallStrategy::NewDocument => {
                let params = AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(payload.source())
                    .build()
                    .map_err(BrowserError::Install)?;
                self.page
                    .execute(params)
                    .await
                    .map_err(|e| BrowserError::Install(e.to_string()))?;
                debug!("Payload registered for new documents");
            }
            InstallStrategy::HeadScript => {
                self.execute_script(&payload.head_loader())
                    .await
                    .map_err(|e| BrowserError::Install(e.to_string()))?;
                debug!("Payload inserted into document head");
            }
        }
        Ok(())
    }

    /// Status of the installed engine; `None` when the page has no engine
    pub async fn engine_status(&self) -> BrowserResult<Option<EngineStatus>> {
        let value = self.execute_script(STATUS_EXPRESSION).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| BrowserError::Script(format!("Unexpected engine status: {}", e)))
    }

    /// Read the overridden values back and compare them with the registry
    pub async fn verify_fingerprint(&self, registry: &OverrideRegistry) -> BrowserResult<FingerprintReport> {
        let probed = self.execute_script(&registry.probe_script()).await?;
        let skipped = self
            .engine_status()
            .await?
            .map(|status| status.skipped)
            .unwrap_or_default();
        Ok(registry.verify(&probed, &skipped))
    }

    /// Run the in-page trigger
    pub async fn run_page_trigger(&self) -> BrowserResult<TriggerOutcome> {
        match self.execute_script(RUN_EXPRESSION).await? {
            Value::Bool(activated) => Ok(TriggerOutcome::from_activated(activated)),
            Value::Null => Err(BrowserError::Script("Capture engine is not installed".to_string())),
            other => Err(BrowserError::Script(format!("Unexpected trigger result: {}", other))),
        }
    }

    /// Copy of the in-page buffer
    pub async fn page_snapshot(&self) -> BrowserResult<Vec<CapturedRecord>> {
        match self.execute_script(SNAPSHOT_EXPRESSION).await? {
            Value::Null => Err(BrowserError::Script("Capture engine is not installed".to_string())),
            value => serde_json::from_value(value)
                .map_err(|e| BrowserError::Script(format!("Unexpected snapshot: {}", e))),
        }
    }
}

#[async_trait]
impl TriggerControl for PageController {
    type Handle = Element;

    async fn locate(&self, control_id: &str) -> CaptureResult<Option<Element>> {
        let id = Value::String(control_id.to_string());
        let present = self
            .execute_script(&format!("document.getElementById({}) !== null", id))
            .await?;
        if present != Value::Bool(true) {
            return Ok(None);
        }

        let selector = format!("[id={}]", id);
        let element = self
            .page
            .find_element(selector.as_str())
            .await
            .map_err(|e| BrowserError::ElementNotFound {
                selector: format!("{} ({})", selector, e),
            })?;
        Ok(Some(element))
    }

    async fn activate(&self, handle: Element) -> CaptureResult<()> {
        handle
            .call_js_fn("function () { this.click(); }", false)
            .await
            .map_err(|e| BrowserError::Script(format!("Click failed: {}", e)))?;
        Ok(())
    }
}

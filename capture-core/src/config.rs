//! Configuration types and utilities

use crate::error::{CaptureError, CaptureResult};
use crate::rule::InterceptRule;
use serde::{Deserialize, Serialize};

/// Where the network hook runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureMode {
    /// Hook, buffer and trigger live in the page's own context
    InPage,
    /// Hook runs host-side on DevTools network events
    Protocol,
}

impl std::str::FromStr for CaptureMode {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inpage" | "in-page" | "page" => Ok(CaptureMode::InPage),
            "protocol" | "cdp" => Ok(CaptureMode::Protocol),
            other => Err(CaptureError::Configuration(format!(
                "Unknown capture mode: {}",
                other
            ))),
        }
    }
}

/// How the payload reaches the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallStrategy {
    /// Registered to run at the start of every new document
    NewDocument,
    /// Inserted as the first child of `document.head` once navigation has
    /// finished; the page's own scripts and their first requests have
    /// already run by then
    HeadScript,
}

impl InstallStrategy {
    /// Whether the payload is in place before any page script runs
    pub fn precedes_page_scripts(self) -> bool {
        matches!(self, InstallStrategy::NewDocument)
    }
}

impl std::str::FromStr for InstallStrategy {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newdocument" | "new-document" => Ok(InstallStrategy::NewDocument),
            "headscript" | "head-script" | "head" => Ok(InstallStrategy::HeadScript),
            other => Err(CaptureError::Configuration(format!(
                "Unknown install strategy: {}",
                other
            ))),
        }
    }
}

/// Values reported by the environment overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub primary_language: String,
    pub fallback_language: String,
    /// Length of the placeholder plugin list
    pub plugin_count: usize,
    pub gpu_vendor: String,
    pub gpu_renderer: String,
    /// Height (and width) reported for loaded images with zero natural height
    pub image_placeholder_height: u32,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            primary_language: "en-US".to_string(),
            fallback_language: "en".to_string(),
            plugin_count: 5,
            gpu_vendor: "Intel Open Source Technology Center".to_string(),
            gpu_renderer: "Mesa DRI Intel(R) Ivybridge Mobile".to_string(),
            image_placeholder_height: 20,
        }
    }
}

/// Timing of the scrape cycle, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub min_wait_secs: u64,
    pub max_wait_secs: u64,
    /// How long to wait for captures after triggering
    pub settle_secs: u64,
    pub refresh_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_wait_secs: 60,
            max_wait_secs: 120,
            settle_secs: 30,
            refresh_interval_secs: 600,
        }
    }
}

/// Complete capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Page to load and keep instrumented
    pub target_url: String,
    pub rule: InterceptRule,
    /// Element id of the control that makes the page issue the calls
    pub trigger_control_id: String,
    pub mode: CaptureMode,
    pub install_strategy: InstallStrategy,
    pub fingerprint: FingerprintConfig,
    pub schedule: ScheduleConfig,
    /// Root directory for processed output
    pub data_dir: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_url: "https://monitoringpublic.solaredge.com/solaredge-web/p/site/public?name=myerssolargrumbles#/layout".to_string(),
            rule: InterceptRule::new(
                ["monitoringpublic.solaredge.com"],
                ["/solaredge-apigw/api/sites/1047995/layout/energy"],
            ),
            trigger_control_id: "ext-comp-1034-button".to_string(),
            mode: CaptureMode::InPage,
            install_strategy: InstallStrategy::NewDocument,
            fingerprint: FingerprintConfig::default(),
            schedule: ScheduleConfig::default(),
            data_dir: "./data/scrap_data".to_string(),
        }
    }
}

impl CaptureConfig {
    /// Valid but lossy combinations worth logging
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.mode == CaptureMode::InPage && !self.install_strategy.precedes_page_scripts() {
            warnings.push(format!(
                "{:?} installs after the page has loaded; requests issued while loading are not captured",
                self.install_strategy
            ));
        }
        warnings
    }

    /// Reject configurations that could never capture anything
    pub fn validate(&self) -> CaptureResult<()> {
        let mut problems = Vec::new();

        if url::Url::parse(&self.target_url).is_err() {
            problems.push(format!("target_url is not an absolute URL: {}", self.target_url));
        }
        if self.rule.hosts.is_empty() {
            problems.push("rule.hosts is empty".to_string());
        }
        if self.rule.paths.is_empty() {
            problems.push("rule.paths is empty".to_string());
        }
        if self.trigger_control_id.trim().is_empty() {
            problems.push("trigger_control_id is empty".to_string());
        }
        if self.schedule.min_wait_secs > self.schedule.max_wait_secs {
            problems.push("schedule.min_wait_secs exceeds schedule.max_wait_secs".to_string());
        }
        if self.schedule.settle_secs == 0 {
            problems.push("schedule.settle_secs must be positive".to_string());
        }
        if self.schedule.refresh_interval_secs == 0 {
            problems.push("schedule.refresh_interval_secs must be positive".to_string());
        }
        if self.fingerprint.plugin_count == 0 {
            problems.push("fingerprint.plugin_count must be positive".to_string());
        }
        if self.fingerprint.image_placeholder_height == 0 {
            problems.push("fingerprint.image_placeholder_height must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CaptureError::Configuration(format!(
                "validation failed: {}",
                problems.join("; ")
            )))
        }
    }
}

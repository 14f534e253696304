//! Capture session
//!
//! One instrumented tab on the target page. Hides the difference between
//! the in-page engine and the protocol-side hook behind the same
//! trigger/snapshot surface.

use crate::engine::browser::BrowserManager;
use crate::engine::network::{document_origin, NetworkPump};
use crate::engine::page::PageController;
use crate::error::BrowserResult;
use capture_core::{
    CaptureConfig, CaptureMode, CapturedRecord, EngineStatus, FingerprintReport, InstallStrategy,
    Installer, NetworkHook, Payload, ResponseBuffer, ScrapeTrigger, TriggerOutcome,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct CaptureSession {
    config: CaptureConfig,
    page: PageController,
    installer: Installer,
    payload: Payload,
    /// Host-side buffer, filled in protocol mode
    buffer: ResponseBuffer,
    trigger: ScrapeTrigger,
    pump: Option<NetworkPump>,
}

impl CaptureSession {
    /// Open a tab, instrument it and load the target page
    pub async fn open(manager: &BrowserManager, config: CaptureConfig) -> BrowserResult<Self> {
        config.validate()?;
        for warning in config.warnings() {
            warn!("{}", warning);
        }

        let page = manager.new_page("about:blank").await?;
        let installer = Installer::from_config(&config);
        let payload = installer.build();
        let buffer = ResponseBuffer::new();
        let trigger = ScrapeTrigger::new(buffer.clone(), config.trigger_control_id.clone());

        let pump = match config.mode {
            CaptureMode::InPage => None,
            CaptureMode::Protocol => {
                let mut hook = NetworkHook::new(config.rule.clone(), buffer.clone());
                if let Some(origin) = document_origin(&config.target_url) {
                    hook = hook.with_origin(origin);
                }
                Some(NetworkPump::attach(page.clone(), Arc::new(Mutex::new(hook))).await?)
            }
        };

        let session = Self {
            page: PageController::new(page),
            config,
            installer,
            payload,
            buffer,
            trigger,
            pump,
        };

        if session.config.install_strategy == InstallStrategy::NewDocument {
            session
                .page
                .install(&session.payload, InstallStrategy::NewDocument)
                .await?;
        }
        session.goto_target().await?;

        info!(
            "Capture session ready on {} ({:?} mode)",
            session.config.target_url, session.config.mode
        );
        Ok(session)
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn page(&self) -> &PageController {
        &self.page
    }

    /// Make sure the tab shows the target page and carries the engine
    pub async fn goto_target(&self) -> BrowserResult<()> {
        let navigated = self.page.navigate_to(&self.config.target_url).await?;
        if navigated && self.config.install_strategy == InstallStrategy::HeadScript {
            self.page
                .install(&self.payload, InstallStrategy::HeadScript)
                .await?;
        }
        self.log_engine_status().await;
        Ok(())
    }

    /// Reload the page; the buffer starts over with the new document
    pub async fn refresh(&self) -> BrowserResult<()> {
        self.page.reload().await?;
        if self.config.install_strategy == InstallStrategy::HeadScript {
            self.page
                .install(&self.payload, InstallStrategy::HeadScript)
                .await?;
        }
        self.log_engine_status().await;
        Ok(())
    }

    /// Clear the buffer and click the trigger control
    pub async fn trigger(&self) -> BrowserResult<TriggerOutcome> {
        let outcome = match self.config.mode {
            CaptureMode::InPage => self.page.run_page_trigger().await?,
            CaptureMode::Protocol => self.trigger.run(&self.page).await?,
        };
        if outcome == TriggerOutcome::ControlMissing {
            warn!(
                "Trigger control '{}' not found on page",
                self.config.trigger_control_id
            );
        }
        Ok(outcome)
    }

    /// Copy of everything captured since the last trigger
    pub async fn snapshot(&self) -> BrowserResult<Vec<CapturedRecord>> {
        match self.config.mode {
            CaptureMode::InPage => self.page.page_snapshot().await,
            CaptureMode::Protocol => Ok(self.buffer.snapshot().await),
        }
    }

    pub async fn engine_status(&self) -> BrowserResult<Option<EngineStatus>> {
        self.page.engine_status().await
    }

    pub async fn verify_fingerprint(&self) -> BrowserResult<FingerprintReport> {
        let report = self.page.verify_fingerprint(self.installer.registry()).await?;
        for mismatch in &report.mismatches {
            warn!(
                "Override {} reads {} (expected {})",
                mismatch.name, mismatch.actual, mismatch.expected
            );
        }
        Ok(report)
    }

    /// Whether the protocol pump is still receiving events
    pub fn is_pumping(&self) -> bool {
        self.pump.as_ref().map(NetworkPump::is_running).unwrap_or(false)
    }

    pub async fn close(self) -> BrowserResult<()> {
        if let Some(pump) = &self.pump {
            pump.stop();
        }
        if let Err(e) = self.page.page().clone().close().await {
            warn!("Failed to close capture tab: {}", e);
        }
        Ok(())
    }

    async fn log_engine_status(&self) {
        match self.page.engine_status().await {
            Ok(Some(status)) => info!(
                "Engine {} installed at {} ({} mode, skipped: {:?})",
                status.version, status.installed_at, status.mode, status.skipped
            ),
            Ok(None) => warn!("Engine not present on {}", self.config.target_url),
            Err(e) => warn!("Could not read engine status: {}", e),
        }
    }
}

//! Scrape scheduler
//!
//! Paces the capture cycle: random wait, dispatch anything new, fire the
//! trigger, let the page settle, dispatch again. The page is reloaded on a
//! fixed interval.

use crate::error::AgentResult;
use crate::processor::ScrapeBatch;
use async_trait::async_trait;
use capture_browser::CaptureSession;
use capture_core::{CapturedRecord, ScheduleConfig, TriggerOutcome};
use chrono::Local;
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What the scheduler drives
#[async_trait]
pub trait ScrapeTarget: Send + Sync {
    async fn trigger(&self) -> AgentResult<TriggerOutcome>;

    /// Everything captured since the last trigger, oldest first
    async fn snapshot(&self) -> AgentResult<Vec<CapturedRecord>>;

    async fn refresh(&self) -> AgentResult<()>;
}

#[async_trait]
impl ScrapeTarget for CaptureSession {
    async fn trigger(&self) -> AgentResult<TriggerOutcome> {
        Ok(CaptureSession::trigger(self).await?)
    }

    async fn snapshot(&self) -> AgentResult<Vec<CapturedRecord>> {
        Ok(CaptureSession::snapshot(self).await?)
    }

    async fn refresh(&self) -> AgentResult<()> {
        CaptureSession::refresh(self).await?;
        Ok(CaptureSession::goto_target(self).await?)
    }
}

pub struct Scheduler<T> {
    target: T,
    schedule: ScheduleConfig,
    batches: mpsc::Sender<ScrapeBatch>,
    /// Records of the current pass already sent downstream
    dispatched: usize,
    last_refresh: Instant,
}

impl<T: ScrapeTarget> Scheduler<T> {
    pub fn new(target: T, schedule: ScheduleConfig, batches: mpsc::Sender<ScrapeBatch>) -> Self {
        Self {
            target,
            schedule,
            batches,
            dispatched: 0,
            last_refresh: Instant::now(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_target(self) -> T {
        self.target
    }

    /// Uniform wait in `[min_wait_secs, max_wait_secs]`; an inverted range
    /// collapses to `min_wait_secs`
    pub fn random_wait(&self) -> Duration {
        let min = self.schedule.min_wait_secs;
        let max = self.schedule.max_wait_secs.max(min);
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }

    pub fn refresh_due(&self) -> bool {
        self.last_refresh.elapsed() >= Duration::from_secs(self.schedule.refresh_interval_secs)
    }

    /// Send records captured since the last dispatch; returns how many
    pub async fn dispatch_pending(&mut self) -> AgentResult<usize> {
        let records = self.target.snapshot().await?;
        // a shorter buffer means it was reset under us
        if records.len() < self.dispatched {
            self.dispatched = 0;
        }
        let fresh: Vec<CapturedRecord> = records[self.dispatched..].to_vec();
        if fresh.is_empty() {
            return Ok(0);
        }

        let count = fresh.len();
        self.dispatched = records.len();
        let batch = ScrapeBatch {
            captured_at: Local::now().naive_local(),
            records: fresh,
        };
        if self.batches.send(batch).await.is_err() {
            warn!("Processor is gone, dropping {} records", count);
        }
        Ok(count)
    }

    /// One pass: dispatch leftovers, trigger, settle, dispatch
    pub async fn cycle(&mut self) -> AgentResult<TriggerOutcome> {
        self.dispatch_pending().await?;

        let outcome = self.target.trigger().await?;
        if outcome == TriggerOutcome::ControlMissing {
            debug!("Trigger control missing, retrying next cycle");
            return Ok(outcome);
        }
        self.dispatched = 0;
        info!("Scraping data at {}", Local::now());

        tokio::time::sleep(Duration::from_secs(self.schedule.settle_secs)).await;
        let count = self.dispatch_pending().await?;
        info!("Dispatched {} captured responses", count);
        Ok(outcome)
    }

    /// Reload the page; the new document starts with an empty buffer
    pub async fn refresh(&mut self) -> AgentResult<()> {
        info!("Refreshing browser");
        self.last_refresh = Instant::now();
        self.dispatched = 0;
        self.target.refresh().await?;
        info!("Browser refreshed");
        Ok(())
    }

    /// Run until the future is dropped
    pub async fn run(&mut self) {
        loop {
            let wait = self.random_wait();
            info!("Waiting for {} seconds", wait.as_secs());
            tokio::time::sleep(wait).await;

            if self.refresh_due() {
                if let Err(e) = self.refresh().await {
                    error!("Error refreshing browser: {}", e);
                }
            }

            if let Err(e) = self.cycle().await {
                error!("Scrape cycle failed: {}", e);
            }
        }
    }
}

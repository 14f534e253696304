//! Capture Agent Binary
//!
//! Standalone executable that keeps a stealth browser on the monitored page,
//! fires the scrape trigger on a randomized schedule and writes the captured
//! readings to disk.

use capture_browser::{BrowserManager, BrowserOptions, CaptureSession, ProxyConfig};
use capture_core::{CaptureConfig, CaptureMode, InstallStrategy};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;
use uuid::Uuid;

pub mod error;
pub mod logging;
pub mod processor;
pub mod scheduler;

#[cfg(test)]
mod config_test;

pub use error::{AgentError, AgentResult};
use processor::DataProcessor;
use scheduler::Scheduler;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a JSON capture configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Page to load and keep instrumented
    #[arg(long)]
    pub target_url: Option<String>,

    /// Capture mode: "inpage" or "protocol"
    #[arg(long)]
    pub mode: Option<String>,

    /// Payload installation: "new-document" or "head-script"
    #[arg(long)]
    pub install_strategy: Option<String>,

    /// Root directory for processed output
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Seconds to wait for responses after triggering
    #[arg(long)]
    pub settle_secs: Option<u64>,

    /// Run the browser without a window
    #[arg(long)]
    pub headless: Option<bool>,

    /// Persistent browser profile directory
    #[arg(long)]
    pub user_data_dir: Option<PathBuf>,

    /// Upstream proxy as host:port
    #[arg(long)]
    pub proxy: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also log to this file, rotated daily
    #[arg(long)]
    pub log_file: Option<String>,

    /// Read the environment overrides back after loading the page
    #[arg(long, default_value_t = false)]
    pub verify_fingerprint: bool,
}

impl Args {
    /// Arguments with nothing set, as if run without flags
    pub fn empty() -> Self {
        Self {
            config: None,
            target_url: None,
            mode: None,
            install_strategy: None,
            data_dir: None,
            settle_secs: None,
            headless: None,
            user_data_dir: None,
            proxy: None,
            log_level: "info".to_string(),
            log_file: None,
            verify_fingerprint: false,
        }
    }
}

/// Capture settings plus the browser-level switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(flatten)]
    pub capture: CaptureConfig,
    pub headless: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            headless: true,
        }
    }
}

fn env_var<T, E>(name: &str, parse: impl FnOnce(&str) -> Result<T, E>) -> AgentResult<Option<T>>
where
    E: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse(raw.trim())
            .map(Some)
            .map_err(|e| AgentError::Configuration(format!("Invalid {}: {} ({})", name, raw, e))),
        Err(_) => Ok(None),
    }
}

/// Resolve configuration: defaults < config file < environment < CLI
pub fn load_capture_config(args: &Args) -> AgentResult<AgentConfig> {
    let mut config = match args.config {
        Some(ref path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                AgentError::Configuration(format!("Failed to read config file {:?}: {}", path, e))
            })?;
            serde_json::from_str::<AgentConfig>(&content).map_err(|e| {
                AgentError::Configuration(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        }
        None => AgentConfig::default(),
    };

    if let Some(url) = env_var("CAPTURE_TARGET_URL", |s| Ok::<_, String>(s.to_string()))? {
        config.capture.target_url = url;
    }
    if let Some(mode) = env_var("CAPTURE_MODE", str::parse::<CaptureMode>)? {
        config.capture.mode = mode;
    }
    if let Some(dir) = env_var("CAPTURE_DATA_DIR", |s| Ok::<_, String>(s.to_string()))? {
        config.capture.data_dir = dir;
    }
    if let Some(secs) = env_var("CAPTURE_SETTLE_SECS", str::parse::<u64>)? {
        config.capture.schedule.settle_secs = secs;
    }
    if let Some(headless) = env_var("CAPTURE_HEADLESS", str::parse::<bool>)? {
        config.headless = headless;
    }

    if let Some(ref url) = args.target_url {
        config.capture.target_url = url.clone();
    }
    if let Some(ref mode) = args.mode {
        config.capture.mode = mode.parse()?;
    }
    if let Some(ref strategy) = args.install_strategy {
        config.capture.install_strategy = strategy.parse::<InstallStrategy>()?;
    }
    if let Some(ref dir) = args.data_dir {
        config.capture.data_dir = dir.clone();
    }
    if let Some(secs) = args.settle_secs {
        config.capture.schedule.settle_secs = secs;
    }
    if let Some(headless) = args.headless {
        config.headless = headless;
    }

    config.capture.validate()?;
    Ok(config)
}

fn parse_proxy(raw: &str) -> AgentResult<ProxyConfig> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| AgentError::Configuration(format!("Proxy must be host:port, got {}", raw)))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| AgentError::Configuration(format!("Invalid proxy port {}: {}", port, e)))?;
    Ok(ProxyConfig::new(host, port))
}

pub async fn run_agent(args: Args) -> AgentResult<()> {
    // Logging should be initialized by the caller (main or test)
    let run_id = Uuid::new_v4().to_string();
    let config = load_capture_config(&args)?;

    tracing::info!("Starting Capture Agent...");
    tracing::info!("  Run:    {}", run_id);
    tracing::info!("  Target: {}", config.capture.target_url);
    tracing::info!("  Mode:   {:?} ({:?})", config.capture.mode, config.capture.install_strategy);
    tracing::info!("  Output: {}", config.capture.data_dir);

    let mut options = BrowserOptions::default().headless(config.headless);
    if let Some(ref dir) = args.user_data_dir {
        options = options.with_user_data_dir(dir);
    }
    if let Some(ref proxy) = args.proxy {
        options = options.with_proxy(parse_proxy(proxy)?);
    }

    let manager = BrowserManager::new();
    manager.launch(options).await?;

    let session = match CaptureSession::open(&manager, config.capture.clone()).await {
        Ok(session) => session,
        Err(e) => {
            manager.close().await?;
            return Err(e.into());
        }
    };

    if args.verify_fingerprint {
        let report = session.verify_fingerprint().await?;
        tracing::info!(
            "Fingerprint: {} verified, {} mismatched, {} unavailable, {} skipped",
            report.verified.len(),
            report.mismatches.len(),
            report.unavailable.len(),
            report.skipped.len()
        );
    }

    let (tx, rx) = mpsc::channel(32);
    let processor = DataProcessor::new(&config.capture.data_dir).spawn(rx);
    let mut scheduler = Scheduler::new(session, config.capture.schedule.clone(), tx);

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping capture agent...");
        }
    }

    // dropping the scheduler closes the batch channel
    let session = scheduler.into_target();
    if let Err(e) = processor.await {
        tracing::warn!("Processor did not stop cleanly: {}", e);
    }
    session.close().await?;
    manager.close().await?;
    Ok(())
}

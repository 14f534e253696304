//! Browser Management Module
//!
//! Handles Chromium browser lifecycle, launch flags and profile directories.

use crate::error::{BrowserError, BrowserResult};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Flags that hide the automation banner and first-run UI
const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--no-first-run",
    "--no-default-browser-check",
];

/// Upstream proxy for browser traffic
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy host (e.g., "127.0.0.1")
    pub host: String,
    /// Proxy port (e.g., 8080)
    pub port: u16,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Convert to proxy URL format
    pub fn to_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Browser launch options
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Run in headless mode (no visible UI)
    pub headless: bool,
    pub proxy: Option<ProxyConfig>,
    /// Additional Chrome arguments
    pub extra_args: Vec<String>,
    /// Persistent profile directory; a throwaway one is created when unset
    pub user_data_dir: Option<PathBuf>,
    pub ignore_ssl_errors: bool,
    pub window_size: Option<(u32, u32)>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            extra_args: Vec::new(),
            user_data_dir: None,
            ignore_ssl_errors: false,
            window_size: Some((1920, 1080)),
        }
    }
}

impl BrowserOptions {
    /// Create options for headed (visible) browser
    pub fn headed() -> Self {
        Self {
            headless: false,
            ..Default::default()
        }
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_user_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_data_dir = Some(dir.into());
        self
    }

    /// Command-line flags passed to Chromium, in order
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(ref proxy) = self.proxy {
            args.push(format!("--proxy-server={}", proxy.to_url()));
        }

        if self.ignore_ssl_errors {
            args.push("--ignore-certificate-errors".to_string());
            args.push("--ignore-ssl-errors".to_string());
        }

        if let Some((width, height)) = self.window_size {
            args.push(format!("--window-size={},{}", width, height));
        }

        args.extend(self.extra_args.iter().cloned());
        args.extend(STEALTH_ARGS.iter().map(|arg| arg.to_string()));
        args
    }
}

/// Managed browser instance
pub struct ManagedBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
    /// Throwaway profile to remove on close
    temp_profile: Option<PathBuf>,
}

impl ManagedBrowser {
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Close the browser and remove its throwaway profile
    pub async fn close(mut self) -> BrowserResult<()> {
        if let Err(e) = self.browser.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        self.handler_task.abort();
        info!("Browser closed");

        if let Some(path) = self.temp_profile {
            if path.exists() {
                info!("Cleaning up browser profile: {:?}", path);
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!("Failed to remove browser profile dir: {:?}", e);
                }
            }
        }
        Ok(())
    }
}

/// Browser launcher and manager
pub struct BrowserManager {
    active_browser: Arc<RwLock<Option<ManagedBrowser>>>,
}

impl BrowserManager {
    pub fn new() -> Self {
        Self {
            active_browser: Arc::new(RwLock::new(None)),
        }
    }

    /// Launch a new browser instance, replacing any running one
    pub async fn launch(&self, options: BrowserOptions) -> BrowserResult<()> {
        self.close().await?;

        let mut config_builder = BrowserConfig::builder();

        // A unique profile avoids SingletonLock errors between runs
        let (profile_dir, temp_profile) = match options.user_data_dir {
            Some(ref dir) => {
                std::fs::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let dir = std::env::temp_dir().join(format!("capture_browser_{}", Uuid::new_v4()));
                (dir.clone(), Some(dir))
            }
        };
        config_builder = config_builder.user_data_dir(&profile_dir);

        // chromiumoxide defaults to headless
        if !options.headless {
            config_builder = config_builder.with_head();
        }

        for arg in options.launch_args() {
            config_builder = config_builder.arg(arg);
        }

        let config = config_builder
            .build()
            .map_err(BrowserError::BrowserLaunch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::BrowserLaunch(format!("Failed to launch browser: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser event error: {:?}", e);
                }
            }
        });

        info!(
            "Browser launched (headless: {}, profile: {:?}, proxy: {:?})",
            options.headless,
            profile_dir,
            options.proxy.as_ref().map(|p| p.to_url())
        );

        let mut guard = self.active_browser.write().await;
        *guard = Some(ManagedBrowser {
            browser,
            handler_task,
            temp_profile,
        });

        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.active_browser.read().await.is_some()
    }

    /// Open a new tab on the active browser
    pub async fn new_page(&self, url: &str) -> BrowserResult<Page> {
        let guard = self.active_browser.read().await;
        let managed = guard
            .as_ref()
            .ok_or_else(|| BrowserError::BrowserConnection("No browser is running".to_string()))?;
        managed
            .browser()
            .new_page(url)
            .await
            .map_err(|e| BrowserError::BrowserConnection(format!("Failed to open page: {}", e)))
    }

    /// Close the active browser
    pub async fn close(&self) -> BrowserResult<()> {
        let mut guard = self.active_browser.write().await;
        if let Some(browser) = guard.take() {
            browser.close().await?;
        }
        Ok(())
    }
}

impl Default for BrowserManager {
    fn default() -> Self {
        Self::new()
    }
}

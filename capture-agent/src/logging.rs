use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to include thread names in logs
    pub include_thread_names: bool,

    /// Whether to include file and line number information
    pub include_file_info: bool,

    /// Whether to enable colored output on the console
    pub enable_colors: bool,

    /// Log file path (optional, if None logs only to stdout); rotated daily
    pub log_file: Option<String>,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();

        module_levels.insert("capture_agent".to_string(), "info".to_string());
        module_levels.insert("capture_browser".to_string(), "info".to_string());
        module_levels.insert("capture_core".to_string(), "info".to_string());
        module_levels.insert("chromiumoxide".to_string(), "warn".to_string());
        module_levels.insert("tungstenite".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            include_thread_names: false,
            include_file_info: false,
            enable_colors: true,
            log_file: None,
            module_levels,
        }
    }
}

/// Build the filter from the base level and module directives
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, AgentError> {
    if !levels::is_valid_level(&config.level) {
        return Err(AgentError::Logging(format!("Invalid log level: {}", config.level)));
    }
    let mut filter = EnvFilter::new(&config.level);

    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| AgentError::Logging(format!("Invalid log directive: {}", e)))?,
        );
    }
    Ok(filter)
}

/// Initialize logging based on the provided configuration.
///
/// The returned guard flushes the log file on drop and must be held for the
/// life of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, AgentError> {
    let filter = build_filter(config)?;

    let (file_layer, guard) = match config.log_file {
        Some(ref path) => {
            let (writer, guard) = tracing_appender::non_blocking(create_file_appender(path)?);
            let layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // Try to initialize logging, ignore if already initialized
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(config.include_thread_names)
                .with_file(config.include_file_info)
                .with_line_number(config.include_file_info)
                .with_ansi(config.enable_colors),
        )
        .with(file_layer)
        .try_init();

    match result {
        Ok(_) => {
            tracing::info!("Logging initialized with config level: {}", config.level);
        }
        Err(_) => {
            tracing::debug!("Logging already initialized, skipping");
        }
    }

    Ok(guard)
}

/// Create a daily-rotated file appender
fn create_file_appender(log_file: &str) -> Result<RollingFileAppender, AgentError> {
    let log_path = Path::new(log_file);
    let directory = match log_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let filename = log_path
        .file_name()
        .ok_or_else(|| AgentError::Logging("Invalid log file name".to_string()))?
        .to_string_lossy();

    std::fs::create_dir_all(directory)
        .map_err(|e| AgentError::Logging(format!("Failed to create log directory: {}", e)))?;

    Ok(RollingFileAppender::new(
        Rotation::DAILY,
        directory,
        filename.as_ref(),
    ))
}

/// Log level utilities
pub mod levels {
    /// Check if a log level string is valid
    pub fn is_valid_level(level: &str) -> bool {
        matches!(
            level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        )
    }
}

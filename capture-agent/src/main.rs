//! Capture Agent Binary Entry Point

use capture_agent::logging::{init_logging, LoggingConfig};
use capture_agent::{run_agent, Args};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let logging = LoggingConfig {
        level: args.log_level.clone(),
        log_file: args.log_file.clone(),
        ..Default::default()
    };
    let _guard = init_logging(&logging)?;

    if let Err(e) = run_agent(args).await {
        tracing::error!("Capture agent failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

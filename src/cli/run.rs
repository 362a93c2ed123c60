use crate::config::parse::load_config;
use crate::config::types::{Config, OutputFormat};
use crate::dispatch::{ConsoleDispatcher, Dispatcher, JsonDispatcher};
use crate::history::History;
use crate::pipeline::{Pipeline, PipelineReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/hawkeye/config.yml");
            eprintln!("  /etc/hawkeye/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, run 'hawkeye config init' to generate one,");
            eprintln!("or use 'hawkeye watch <source>...' to watch without a config file.");
            std::process::exit(1);
        }
    };

    run_from_file(&config_path).await?;
    Ok(())
}

async fn run_from_file(config_path: &Path) -> Result<PipelineReport, RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    run_config(&config).await
}

/// Dispatcher matching the configured output format.
pub fn dispatcher_for(config: &Config) -> Arc<dyn Dispatcher> {
    match config.output.format {
        OutputFormat::Console => Arc::new(ConsoleDispatcher::new(config.sources.len() > 1)),
        OutputFormat::Json => Arc::new(JsonDispatcher::new(!config.output.quiet)),
    }
}

/// Run the pipeline for `config` until its sources end or Ctrl+C.
pub async fn run_config(config: &Config) -> Result<PipelineReport, RunError> {
    let history = History::shared(&config.history);
    let pipeline = Pipeline::from_config(config, dispatcher_for(config))?.with_history(history);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    let signal_handle = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    info!("Pipeline starting, press Ctrl+C to shutdown");
    let result = pipeline.run(shutdown).await;
    signal_handle.abort();

    let report = result?;
    log_report(&report);
    Ok(report)
}

fn log_report(report: &PipelineReport) {
    for source in &report.sources {
        match &source.error {
            Some(error) => warn!(
                source_id = %source.source_id,
                kind = %source.kind,
                last_position = ?source.last_position,
                error = %error,
                "Source failed"
            ),
            None => info!(
                source_id = %source.source_id,
                state = ?source.state,
                lines = source.lines_read,
                issues = source.issues_detected,
                last_position = ?source.last_position,
                "Source finished"
            ),
        }
    }
    info!(
        issues = report.issues_aggregated,
        batches = report.batches_flushed,
        "Run complete"
    );
}

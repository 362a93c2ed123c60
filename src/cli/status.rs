use crate::aggregate::Batch;
use crate::classify::{Classifier, Severity};
use crate::config::expand_tilde;
use crate::config::types::{Config, DetectionConfig, HistoryConfig, PipelineConfig, ReadConfig, ReadStart};
use crate::dispatch::Dispatcher;
use crate::history::{History, HistorySummary};
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::source::file::FileSource;
use crate::source::SourceReader;
use async_trait::async_trait;
use chrono::Utc;
use clap::Args;
use console::style;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Log file to summarize
    #[arg(short, long)]
    pub file: PathBuf,

    /// Look back this many minutes
    #[arg(short, long, default_value_t = 30)]
    pub minutes: u64,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub summary: HistorySummary,
    pub recent_issues: Vec<IssueLine>,
}

#[derive(Debug, Serialize)]
pub struct IssueLine {
    pub severity: Severity,
    pub source_id: String,
    pub text: String,
}

/// Discards batches; status only needs the history.
struct NullDispatcher;

#[async_trait]
impl Dispatcher for NullDispatcher {
    async fn on_batch(&self, _batch: Batch) {}
}

const RECENT_ISSUE_LIMIT: usize = 10;

/// Classify a whole file once and summarize the lookback window.
pub async fn summarize(
    path: PathBuf,
    minutes: u64,
    detection: &DetectionConfig,
) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let path = expand_tilde(&path);
    let history_config = HistoryConfig {
        max_lines: usize::MAX,
        max_issues: usize::MAX,
        ..Default::default()
    };
    let history = History::shared(&history_config);

    let classifier = Classifier::new(detection)?;
    let mut options = PipelineOptions::from(&Config::with_sources(Default::default()));
    options.quiet = true;

    let read = ReadConfig {
        start: ReadStart::Beginning,
        follow: false,
        offset: None,
    };
    let source = FileSource::new("file", &path, read, &PipelineConfig::default());
    let mut pipeline = Pipeline::new(classifier, Arc::new(NullDispatcher), options)
        .with_history(history.clone());
    pipeline.add_source(SourceReader::new("file", Box::new(source)));

    let report = pipeline.run(CancellationToken::new()).await?;
    if let Some(failed) = report.failed_sources().next() {
        return Err(failed
            .error
            .clone()
            .unwrap_or_else(|| "source failed".to_string())
            .into());
    }

    let within = Duration::from_secs(minutes.saturating_mul(60));
    let now = Utc::now();
    let guard = history.lock().map_err(|_| "history lock poisoned")?;
    let summary = guard.summary(within, now);
    let issues = guard.recent_issues(within, now);
    let recent_issues = issues
        .iter()
        .skip(issues.len().saturating_sub(RECENT_ISSUE_LIMIT))
        .map(|issue| IssueLine {
            severity: issue.severity,
            source_id: issue.source_id.clone(),
            text: issue.trigger.raw_text.clone(),
        })
        .collect();

    Ok(StatusReport {
        summary,
        recent_issues,
    })
}

pub fn render(report: &StatusReport) -> String {
    let summary = &report.summary;
    let health = if summary.error_count > 0 {
        style("UNHEALTHY").red().bold()
    } else if summary.warning_count > 0 {
        style("DEGRADED").yellow().bold()
    } else {
        style("HEALTHY").green().bold()
    };

    let mut out = format!(
        "Status: {}\n  window:   last {} minute(s)\n  lines:    {}\n  issues:   {} ({} error(s), {} warning(s))\n",
        health,
        summary.minutes,
        summary.total_lines,
        summary.total_issues,
        summary.error_count,
        summary.warning_count,
    );
    if !report.recent_issues.is_empty() {
        out.push_str("\nRecent issues:\n");
        for issue in &report.recent_issues {
            let tag = match issue.severity {
                Severity::Error => style("[ERR]").red(),
                Severity::Warning => style("[WRN]").yellow(),
            };
            out.push_str(&format!("  {} {}\n", tag, issue.text));
        }
    }
    out
}

pub async fn status(
    args: StatusArgs,
    config: Option<&Config>,
) -> Result<(), Box<dyn std::error::Error>> {
    let detection = config.map(|c| c.detection.clone()).unwrap_or_default();
    let report = summarize(args.file, args.minutes, &detection).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

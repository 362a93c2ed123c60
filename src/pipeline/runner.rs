use crate::aggregate::{run_aggregator, AggregatorConfig, Issue};
use crate::classify::{Classifier, ClassifierError};
use crate::config::types::{Config, SourceConfig};
use crate::context::ContextWindow;
use crate::dispatch::{run_dispatcher, Dispatcher};
use crate::history::SharedHistory;
use crate::pipeline::channel::{batch_channel, issue_channel, IssueSender};
use crate::source::{
    reader_from_config, LogLine, SourceError, SourceKind, SourceReader, SourceState,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that stop the whole pipeline. Failures of individual sources are
/// reported in [`PipelineReport`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no source could be started:\n{}", .0.join("\n"))]
    NoSources(Vec<String>),

    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub context_lines: usize,
    pub channel_capacity: usize,
    pub batching: AggregatorConfig,
    /// Only flagged lines are passed to `Dispatcher::on_line`.
    pub quiet: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&Config::with_sources(Default::default()))
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            context_lines: config.context.lines,
            channel_capacity: config.pipeline.channel_capacity,
            batching: AggregatorConfig::from(&config.batching),
            quiet: config.output.quiet,
        }
    }
}

/// Final account of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub kind: SourceKind,
    pub state: SourceState,
    pub lines_read: u64,
    pub issues_detected: u64,
    /// Resume offset for file sources.
    pub last_position: Option<u64>,
    pub error: Option<String>,
}

impl SourceReport {
    fn failed(source_id: &str, kind: SourceKind, error: &SourceError) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind,
            state: SourceState::Errored,
            lines_read: 0,
            issues_detected: 0,
            last_position: error.position(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub sources: Vec<SourceReport>,
    pub issues_aggregated: u64,
    pub batches_flushed: u64,
    pub batches_delivered: u64,
}

impl PipelineReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| s.state == SourceState::Errored)
    }
}

/// Sources → classifier/context → aggregator → dispatcher.
///
/// One task per source, one aggregator task, one dispatcher task. Sources
/// share nothing but the issue channel and the optional history.
pub struct Pipeline {
    readers: Vec<SourceReader>,
    failed: Vec<SourceReport>,
    classifier: Arc<Classifier>,
    dispatcher: Arc<dyn Dispatcher>,
    history: Option<SharedHistory>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        classifier: Classifier,
        dispatcher: Arc<dyn Dispatcher>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            readers: Vec::new(),
            failed: Vec::new(),
            classifier: Arc::new(classifier),
            dispatcher,
            history: None,
            options,
        }
    }

    /// Build a pipeline with one reader per configured source, in id order.
    pub fn from_config(
        config: &Config,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, PipelineError> {
        let classifier = Classifier::new(&config.detection)?;
        let mut pipeline = Self::new(classifier, dispatcher, PipelineOptions::from(config));

        let mut ids: Vec<&String> = config.sources.keys().collect();
        ids.sort();
        for source_id in ids {
            let source_config = &config.sources[source_id];
            match reader_from_config(source_id, source_config, &config.pipeline) {
                Ok(reader) => pipeline.add_source(reader),
                Err(e) => {
                    warn!(source_id = %source_id, error = %e, "Failed to create source");
                    pipeline
                        .failed
                        .push(SourceReport::failed(source_id, kind_of(source_config), &e));
                }
            }
        }

        Ok(pipeline)
    }

    pub fn add_source(&mut self, reader: SourceReader) {
        self.readers.push(reader);
    }

    pub fn with_history(mut self, history: SharedHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Run until every source has ended or `shutdown` is cancelled, then
    /// flush all open batches and wait for the dispatcher to finish.
    ///
    /// Each source opens inside its own task, so a slow open delays only
    /// that source and still yields to `shutdown`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineReport, PipelineError> {
        let mut reports = self.failed;

        let (issue_tx, issue_rx) = issue_channel(self.options.channel_capacity);
        let (batch_tx, batch_rx) = batch_channel();

        let aggregator_handle =
            tokio::spawn(run_aggregator(issue_rx, batch_tx, self.options.batching.clone()));
        let dispatcher_handle = tokio::spawn(run_dispatcher(batch_rx, self.dispatcher.clone()));

        info!(sources = self.readers.len(), "Pipeline started");

        let source_handles: Vec<_> = self
            .readers
            .into_iter()
            .map(|reader| {
                let task = SourceTask {
                    window: ContextWindow::new(self.options.context_lines),
                    reader,
                    classifier: self.classifier.clone(),
                    dispatcher: self.dispatcher.clone(),
                    history: self.history.clone(),
                    issues: issue_tx.clone(),
                    quiet: self.options.quiet,
                    issues_detected: 0,
                };
                tokio::spawn(task.run(shutdown.clone()))
            })
            .collect();

        // Aggregator drains once the last source task drops its sender
        drop(issue_tx);

        let mut any_opened = false;
        for handle in source_handles {
            let outcome = handle.await?;
            any_opened |= outcome.opened;
            reports.push(outcome.report);
        }
        let aggregated = aggregator_handle.await?;
        let delivered = dispatcher_handle.await?;

        if !any_opened && !shutdown.is_cancelled() {
            let reasons = reports.iter().filter_map(|r| r.error.clone()).collect();
            return Err(PipelineError::NoSources(reasons));
        }

        info!(
            issues = aggregated.issues_received,
            batches = aggregated.batches_flushed,
            "Pipeline shutdown complete"
        );

        Ok(PipelineReport {
            sources: reports,
            issues_aggregated: aggregated.issues_received,
            batches_flushed: aggregated.batches_flushed,
            batches_delivered: delivered,
        })
    }
}

fn kind_of(config: &SourceConfig) -> SourceKind {
    match config {
        SourceConfig::File { .. } => SourceKind::File,
        SourceConfig::Stdin => SourceKind::Stdin,
        SourceConfig::Container { .. } => SourceKind::Container,
    }
}

struct SourceOutcome {
    opened: bool,
    report: SourceReport,
}

/// Read, classify and forward for one source. Owns that source's context
/// window exclusively.
struct SourceTask {
    reader: SourceReader,
    window: ContextWindow,
    classifier: Arc<Classifier>,
    dispatcher: Arc<dyn Dispatcher>,
    history: Option<SharedHistory>,
    issues: IssueSender,
    quiet: bool,
    issues_detected: u64,
}

impl SourceTask {
    async fn run(mut self, shutdown: CancellationToken) -> SourceOutcome {
        let opened = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = self.reader.open() => Some(result),
        };

        match opened {
            None => {
                info!(source_id = %self.reader.source_id(), "Stopped before source opened");
                self.reader.close();
                return SourceOutcome {
                    opened: false,
                    report: self.report(None),
                };
            }
            Some(Err(e)) => {
                warn!(
                    source_id = %self.reader.source_id(),
                    target = %self.reader.describe(),
                    error = %e,
                    "Source failed to start, continuing without it"
                );
                return SourceOutcome {
                    opened: false,
                    report: SourceReport::failed(self.reader.source_id(), self.reader.kind(), &e),
                };
            }
            Some(Ok(())) => {}
        }

        let mut error = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                next = self.reader.next_line() => Some(next),
            };

            let Some(next) = next else {
                info!(source_id = %self.reader.source_id(), "Stopping source");
                self.reader.close();
                break;
            };

            match next {
                Ok(Some(line)) => {
                    if !self.process(line).await {
                        self.reader.close();
                        break;
                    }
                }
                Ok(None) => {
                    info!(
                        source_id = %self.reader.source_id(),
                        lines = self.reader.lines_read(),
                        "Source ended"
                    );
                    break;
                }
                Err(e) => {
                    // Already logged by the reader
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        SourceOutcome {
            opened: true,
            report: self.report(error),
        }
    }

    fn report(&self, error: Option<String>) -> SourceReport {
        SourceReport {
            source_id: self.reader.source_id().to_string(),
            kind: self.reader.kind(),
            state: self.reader.state(),
            lines_read: self.reader.lines_read(),
            issues_detected: self.issues_detected,
            last_position: self.reader.position(),
            error,
        }
    }

    /// Returns false once the aggregator is gone.
    async fn process(&mut self, line: LogLine) -> bool {
        let line = Arc::new(line);
        let classification = self.classifier.classify(&line.raw_text);

        if let Some(history) = &self.history {
            if let Ok(mut guard) = history.lock() {
                guard.record_line(line.clone());
            }
        }

        if !self.quiet || classification.is_issue() {
            self.dispatcher.on_line(&line, &classification);
        }

        // Context is captured before the trigger enters the window
        let context = self.window.snapshot();
        if let Some(issue) = Issue::from_classification(&classification, line.clone(), context) {
            self.issues_detected += 1;
            debug!(
                source_id = %issue.source_id,
                severity = %issue.severity,
                matched = %issue.matched,
                context = issue.context_before.len(),
                "Issue detected"
            );

            if let Some(history) = &self.history {
                if let Ok(mut guard) = history.lock() {
                    guard.record_issue(issue.clone());
                }
            }

            if self.issues.send(issue).await.is_err() {
                error!(
                    source_id = %self.reader.source_id(),
                    sequence = line.sequence,
                    "Aggregator channel closed, issue not delivered"
                );
                return false;
            }
        }

        self.window.push(line);
        true
    }
}

//! Container log source.
//!
//! The [`ContainerLogApi`] trait abstracts the Docker daemon so that
//! production code uses [`BollardLogApi`] while tests script a mock.
//!
//! Lines are requested with daemon timestamps, which are stripped from the
//! text and used as `observed_at`. After a reconnect the stream is resumed
//! from the last seen timestamp and replayed lines at or before it are
//! dropped.

use crate::config::types::RetryConfig;
use crate::source::backoff::Backoff;
use crate::source::line::SourceKind;
use crate::source::reader::{LineSource, RawLine, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContainerApiError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("docker api error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStreamOptions {
    /// Existing lines to replay; `None` replays everything (subject to `since`).
    pub tail: Option<u64>,
    /// Unix seconds; only lines at or after this time are sent.
    pub since: Option<i64>,
}

pub type LogChunkStream = BoxStream<'static, Result<Vec<u8>, ContainerApiError>>;

#[async_trait]
pub trait ContainerLogApi: Send + Sync {
    async fn is_running(&self, container: &str) -> Result<bool, ContainerApiError>;

    /// Follow the combined stdout/stderr stream with timestamps enabled.
    async fn stream_logs(
        &self,
        container: &str,
        options: &LogStreamOptions,
    ) -> Result<LogChunkStream, ContainerApiError>;
}

/// Docker client backed by `bollard`.
pub struct BollardLogApi {
    docker: Arc<bollard::Docker>,
}

impl BollardLogApi {
    pub fn connect_local() -> Result<Self, ContainerApiError> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| ContainerApiError::Api(format!("failed to connect to docker: {e}")))?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    pub fn connect_with_socket(socket_path: &str) -> Result<Self, ContainerApiError> {
        let docker =
            bollard::Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    ContainerApiError::Api(format!(
                        "failed to connect to docker at {socket_path}: {e}"
                    ))
                })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

fn api_error(container: &str, err: bollard::errors::Error) -> ContainerApiError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ContainerApiError::NotFound(container.to_owned()),
        other => ContainerApiError::Api(other.to_string()),
    }
}

#[async_trait]
impl ContainerLogApi for BollardLogApi {
    async fn is_running(&self, container: &str) -> Result<bool, ContainerApiError> {
        let details = self
            .docker
            .inspect_container(container, None)
            .await
            .map_err(|e| api_error(container, e))?;
        Ok(details.state.and_then(|s| s.running).unwrap_or(false))
    }

    async fn stream_logs(
        &self,
        container: &str,
        options: &LogStreamOptions,
    ) -> Result<LogChunkStream, ContainerApiError> {
        use bollard::container::LogsOptions;

        let logs_options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            since: options.since.unwrap_or(0),
            tail: options
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_owned()),
            ..Default::default()
        };

        let name = container.to_owned();
        let stream = self
            .docker
            .logs(container, Some(logs_options))
            .map(move |item| {
                item.map(|output| output.into_bytes().to_vec())
                    .map_err(|e| api_error(&name, e))
            });
        Ok(stream.boxed())
    }
}

/// Split a leading RFC 3339 timestamp off a daemon log line.
pub fn split_timestamp(text: &str) -> (Option<DateTime<Utc>>, &str) {
    if !text.starts_with(|c: char| c.is_ascii_digit()) {
        return (None, text);
    }
    match text.split_once(' ') {
        Some((head, rest)) => match DateTime::parse_from_rfc3339(head) {
            Ok(ts) => (Some(ts.with_timezone(&Utc)), rest),
            Err(_) => (None, text),
        },
        None => (None, text),
    }
}

pub struct ContainerSource {
    source_id: String,
    container: String,
    tail: Option<u64>,
    api: Arc<dyn ContainerLogApi>,
    backoff: Backoff,

    stream: Option<LogChunkStream>,
    carry: Vec<u8>,
    pending: VecDeque<RawLine>,
    /// Newest daemon timestamp emitted so far.
    last_timestamp: Option<DateTime<Utc>>,
    /// While set, lines stamped at or before it are replays and are dropped.
    replay_cutoff: Option<DateTime<Utc>>,
    connected_at: Option<DateTime<Utc>>,
    last_error: String,
    finished: bool,
}

impl ContainerSource {
    pub fn new(
        source_id: impl Into<String>,
        container: impl Into<String>,
        tail: Option<u64>,
        api: Arc<dyn ContainerLogApi>,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            container: container.into(),
            tail,
            api,
            backoff: Backoff::new(retry),
            stream: None,
            carry: Vec::new(),
            pending: VecDeque::new(),
            last_timestamp: None,
            replay_cutoff: None,
            connected_at: None,
            last_error: String::new(),
            finished: false,
        }
    }

    fn startup_error(&self, err: ContainerApiError) -> SourceError {
        match err {
            ContainerApiError::NotFound(_) => SourceError::Container {
                source_id: self.source_id.clone(),
                reason: err.to_string(),
            },
            ContainerApiError::Api(reason) => SourceError::Unreachable {
                source_id: self.source_id.clone(),
                attempts: 1,
                reason,
            },
        }
    }

    async fn reconnect(&mut self) -> Result<(), SourceError> {
        loop {
            let Some(delay) = self.backoff.next_delay() else {
                return Err(SourceError::Unreachable {
                    source_id: self.source_id.clone(),
                    attempts: self.backoff.attempts(),
                    reason: self.last_error.clone(),
                });
            };
            warn!(
                source_id = %self.source_id,
                container = %self.container,
                attempt = self.backoff.attempts(),
                delay = ?delay,
                reason = %self.last_error,
                "container log stream lost, reconnecting"
            );
            sleep(delay).await;

            let resume_from = self.last_timestamp.or(self.connected_at);
            let options = LogStreamOptions {
                tail: None,
                since: resume_from.map(|ts| ts.timestamp()),
            };
            match self.api.stream_logs(&self.container, &options).await {
                Ok(stream) => {
                    info!(source_id = %self.source_id, container = %self.container, "reconnected");
                    self.stream = Some(stream);
                    self.replay_cutoff = self.last_timestamp;
                    return Ok(());
                }
                Err(err @ ContainerApiError::NotFound(_)) => {
                    return Err(SourceError::Container {
                        source_id: self.source_id.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => self.last_error = err.to_string(),
            }
        }
    }

    fn push_chunk(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        while let Some(pos) = self.carry.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    fn flush_carry(&mut self) {
        if !self.carry.is_empty() {
            let line = std::mem::take(&mut self.carry);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, bytes: &[u8]) {
        let decoded = String::from_utf8_lossy(bytes);
        let text = decoded.trim_end_matches(['\n', '\r']);
        let (timestamp, content) = split_timestamp(text);

        if let (Some(ts), Some(cutoff)) = (timestamp, self.replay_cutoff) {
            if ts <= cutoff {
                trace!(source_id = %self.source_id, timestamp = %ts, "dropping replayed line");
                return;
            }
            self.replay_cutoff = None;
        }
        if let Some(ts) = timestamp {
            self.last_timestamp = Some(self.last_timestamp.map_or(ts, |last| last.max(ts)));
        }

        self.pending.push_back(RawLine {
            text: content.to_owned(),
            observed_at: timestamp,
            position: None,
        });
    }
}

#[async_trait]
impl LineSource for ContainerSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Container
    }

    fn describe(&self) -> String {
        format!("docker:{}", self.container)
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let running = self
            .api
            .is_running(&self.container)
            .await
            .map_err(|e| self.startup_error(e))?;
        if !running {
            return Err(SourceError::Container {
                source_id: self.source_id.clone(),
                reason: format!("container is not running: {}", self.container),
            });
        }

        let options = LogStreamOptions {
            tail: self.tail,
            since: None,
        };
        let stream = self
            .api
            .stream_logs(&self.container, &options)
            .await
            .map_err(|e| self.startup_error(e))?;
        self.stream = Some(stream);
        self.connected_at = Some(Utc::now());
        Ok(())
    }

    async fn next_raw(&mut self) -> Result<Option<RawLine>, SourceError> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if self.finished {
                return Ok(None);
            }

            let Some(stream) = self.stream.as_mut() else {
                self.reconnect().await?;
                continue;
            };

            match stream.next().await {
                Some(Ok(chunk)) => {
                    self.backoff.reset();
                    self.push_chunk(&chunk);
                }
                Some(Err(err)) => {
                    debug!(source_id = %self.source_id, error = %err, "log stream error");
                    self.stream = None;
                    self.carry.clear();
                    self.last_error = err.to_string();
                }
                None => {
                    self.stream = None;
                    self.flush_carry();
                    match self.api.is_running(&self.container).await {
                        Ok(true) => {
                            self.last_error = "log stream ended while container running".into();
                        }
                        Ok(false) | Err(ContainerApiError::NotFound(_)) => {
                            info!(source_id = %self.source_id, container = %self.container, "container stopped");
                            self.finished = true;
                        }
                        Err(err) => self.last_error = err.to_string(),
                    }
                }
            }
        }
    }
}

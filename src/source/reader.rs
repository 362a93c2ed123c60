use crate::source::line::{LogLine, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source '{source_id}': file not found: {}", .path.display())]
    NotFound { source_id: String, path: PathBuf },

    #[error("source '{source_id}': io error at position {}: {source}", fmt_position(.position))]
    Io {
        source_id: String,
        position: Option<u64>,
        #[source]
        source: std::io::Error,
    },

    #[error("source '{source_id}': unreachable after {attempts} attempts: {reason}")]
    Unreachable {
        source_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("source '{source_id}': {reason}")]
    Container { source_id: String, reason: String },
}

fn fmt_position(position: &Option<u64>) -> String {
    match position {
        Some(p) => p.to_string(),
        None => "unknown".to_string(),
    }
}

impl SourceError {
    pub fn source_id(&self) -> &str {
        match self {
            SourceError::NotFound { source_id, .. }
            | SourceError::Io { source_id, .. }
            | SourceError::Unreachable { source_id, .. }
            | SourceError::Container { source_id, .. } => source_id,
        }
    }

    /// Last successful read position, when the source tracks one.
    pub fn position(&self) -> Option<u64> {
        match self {
            SourceError::Io { position, .. } => *position,
            _ => None,
        }
    }
}

/// A line as produced by a concrete source, before sequence stamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub text: String,
    /// Timestamp carried by the source itself (container log prefix).
    pub observed_at: Option<DateTime<Utc>>,
    pub position: Option<u64>,
}

impl RawLine {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            observed_at: None,
            position: None,
        }
    }
}

/// A line-producing collaborator. `Ok(None)` is normal end of stream; an
/// error is fatal for this source. Transient failures are retried inside
/// the implementation and never surface here.
#[async_trait]
pub trait LineSource: Send {
    fn kind(&self) -> SourceKind;

    /// Human-readable target (path, container name) for logs.
    fn describe(&self) -> String;

    async fn open(&mut self) -> Result<(), SourceError>;

    async fn next_raw(&mut self) -> Result<Option<RawLine>, SourceError>;

    /// Offset just past the last line returned, for resumable sources.
    fn position(&self) -> Option<u64> {
        None
    }

    /// True while the source has consumed everything available and is
    /// waiting for more.
    fn caught_up(&self) -> bool {
        false
    }
}

/// Liveness of a source handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Active,
    Following,
    Closed,
    Errored,
}

/// Wraps a `LineSource`, stamping per-source sequence numbers and tracking
/// liveness.
pub struct SourceReader {
    source_id: String,
    inner: Box<dyn LineSource>,
    next_sequence: u64,
    terminal: Option<SourceState>,
}

impl SourceReader {
    pub fn new(source_id: impl Into<String>, inner: Box<dyn LineSource>) -> Self {
        Self {
            source_id: source_id.into(),
            inner,
            next_sequence: 0,
            terminal: None,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    pub fn describe(&self) -> String {
        self.inner.describe()
    }

    pub async fn open(&mut self) -> Result<(), SourceError> {
        match self.inner.open().await {
            Ok(()) => {
                info!(
                    source_id = %self.source_id,
                    kind = %self.inner.kind(),
                    target = %self.inner.describe(),
                    "source opened"
                );
                Ok(())
            }
            Err(e) => {
                self.terminal = Some(SourceState::Errored);
                Err(e)
            }
        }
    }

    /// Next line, or `None` once the source has ended normally.
    pub async fn next_line(&mut self) -> Result<Option<LogLine>, SourceError> {
        if self.terminal.is_some() {
            return Ok(None);
        }

        match self.inner.next_raw().await {
            Ok(Some(raw)) => {
                let line = LogLine {
                    source_id: self.source_id.clone(),
                    sequence: self.next_sequence,
                    raw_text: raw.text,
                    observed_at: raw.observed_at.unwrap_or_else(Utc::now),
                    position: raw.position,
                };
                self.next_sequence += 1;
                Ok(Some(line))
            }
            Ok(None) => {
                debug!(source_id = %self.source_id, lines = self.next_sequence, "source closed");
                self.terminal = Some(SourceState::Closed);
                Ok(None)
            }
            Err(e) => {
                warn!(
                    source_id = %self.source_id,
                    position = ?self.inner.position(),
                    error = %e,
                    "source failed"
                );
                self.terminal = Some(SourceState::Errored);
                Err(e)
            }
        }
    }

    /// Stop reading; later calls to `next_line` return `None`.
    pub fn close(&mut self) {
        self.terminal.get_or_insert(SourceState::Closed);
    }

    pub fn state(&self) -> SourceState {
        match self.terminal {
            Some(state) => state,
            None if self.inner.caught_up() => SourceState::Following,
            None => SourceState::Active,
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.next_sequence
    }

    pub fn position(&self) -> Option<u64> {
        self.inner.position()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted source for tests: yields its items in order, then ends.
    pub(crate) struct ScriptedSource {
        pub items: VecDeque<Result<RawLine, SourceError>>,
        pub fail_open: bool,
        pub open_delay: Option<std::time::Duration>,
    }

    impl ScriptedSource {
        pub(crate) fn lines(lines: &[&str]) -> Self {
            Self {
                items: lines.iter().map(|l| Ok(RawLine::text(*l))).collect(),
                fail_open: false,
                open_delay: None,
            }
        }
    }

    #[async_trait]
    impl LineSource for ScriptedSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Stdin
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn open(&mut self) -> Result<(), SourceError> {
            if let Some(delay) = self.open_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_open {
                return Err(SourceError::NotFound {
                    source_id: "scripted".to_string(),
                    path: PathBuf::from("/missing"),
                });
            }
            Ok(())
        }

        async fn next_raw(&mut self) -> Result<Option<RawLine>, SourceError> {
            self.items.pop_front().transpose()
        }
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let mut reader = SourceReader::new("app", Box::new(ScriptedSource::lines(&["a", "b", "c"])));
        reader.open().await.unwrap();

        let mut seen = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            assert_eq!(line.source_id, "app");
            seen.push((line.sequence, line.raw_text));
        }
        assert_eq!(
            seen,
            vec![
                (0, "a".to_string()),
                (1, "b".to_string()),
                (2, "c".to_string())
            ]
        );
        assert_eq!(reader.state(), SourceState::Closed);
        assert_eq!(reader.lines_read(), 3);
    }

    #[tokio::test]
    async fn test_error_marks_reader_errored() {
        let mut source = ScriptedSource::lines(&["ok"]);
        source.items.push_back(Err(SourceError::Io {
            source_id: "app".to_string(),
            position: Some(42),
            source: std::io::Error::other("disk gone"),
        }));
        let mut reader = SourceReader::new("app", Box::new(source));
        reader.open().await.unwrap();

        assert!(reader.next_line().await.unwrap().is_some());
        let err = reader.next_line().await.unwrap_err();
        assert_eq!(err.source_id(), "app");
        assert_eq!(err.position(), Some(42));
        assert_eq!(reader.state(), SourceState::Errored);
        assert!(reader.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_open_is_errored() {
        let mut source = ScriptedSource::lines(&[]);
        source.fail_open = true;
        let mut reader = SourceReader::new("app", Box::new(source));
        assert!(reader.open().await.is_err());
        assert_eq!(reader.state(), SourceState::Errored);
    }

    #[test]
    fn test_error_messages_name_the_source() {
        let err = SourceError::Io {
            source_id: "web".to_string(),
            position: None,
            source: std::io::Error::other("boom"),
        };
        assert_eq!(err.to_string(), "source 'web': io error at position unknown: boom");
    }
}

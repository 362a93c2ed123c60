use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Stdin,
    Container,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::File => write!(f, "file"),
            SourceKind::Stdin => write!(f, "stdin"),
            SourceKind::Container => write!(f, "container"),
        }
    }
}

/// One line read from a source. Immutable once produced; shared downstream
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub source_id: String,
    /// Monotonic per source, starting at 0.
    pub sequence: u64,
    pub raw_text: String,
    pub observed_at: DateTime<Utc>,
    /// Byte offset of the line start (file sources only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

impl LogLine {
    pub fn new(source_id: impl Into<String>, sequence: u64, raw_text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            sequence,
            raw_text: raw_text.into(),
            observed_at: Utc::now(),
            position: None,
        }
    }
}

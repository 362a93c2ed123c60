use crate::classify::{Classification, Severity};
use crate::config::types::AggregationScope;
use crate::source::LogLine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A flagged line with the context that preceded it on the same source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    /// Text that triggered the classification.
    pub matched: String,
    pub trigger: Arc<LogLine>,
    /// Oldest first; never includes the trigger itself.
    pub context_before: Vec<Arc<LogLine>>,
    pub source_id: String,
    pub detected_at: DateTime<Utc>,
}

impl Issue {
    /// Returns `None` for lines that did not classify as a problem.
    pub fn from_classification(
        classification: &Classification,
        trigger: Arc<LogLine>,
        context_before: Vec<Arc<LogLine>>,
    ) -> Option<Self> {
        let severity = classification.severity()?;
        let matched = classification.matched().unwrap_or_default().to_string();
        Some(Self {
            severity,
            matched,
            source_id: trigger.source_id.clone(),
            trigger,
            context_before,
            detected_at: Utc::now(),
        })
    }
}

/// Which open batch an issue joins.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "source_id")]
pub enum BatchScope {
    Global,
    Source(String),
}

impl BatchScope {
    pub fn for_issue(scope: AggregationScope, issue: &Issue) -> Self {
        match scope {
            AggregationScope::Global => BatchScope::Global,
            AggregationScope::PerSource => BatchScope::Source(issue.source_id.clone()),
        }
    }
}

impl fmt::Display for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchScope::Global => write!(f, "global"),
            BatchScope::Source(id) => write!(f, "source:{}", id),
        }
    }
}

/// Why a batch was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// The window elapsed with no new issue.
    Debounce,
    MaxSize,
    MaxAge,
    /// All inputs ended or the pipeline was cancelled.
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushReason::Debounce => write!(f, "debounce"),
            FlushReason::MaxSize => write!(f, "max_size"),
            FlushReason::MaxAge => write!(f, "max_age"),
            FlushReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A closed group of issues, in detection order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    /// Monotonic per pipeline run, starting at 0, in flush order.
    pub sequence: u64,
    pub scope: BatchScope,
    pub issues: Vec<Issue>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sources: BTreeSet<String>,
    pub reason: FlushReason,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == severity)
            .count()
    }
}

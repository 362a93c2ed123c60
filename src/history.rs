use crate::aggregate::Issue;
use crate::classify::Severity;
use crate::config::types::HistoryConfig;
use crate::source::LogLine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared handle; source tasks record into it, query features read from it.
pub type SharedHistory = Arc<Mutex<History>>;

/// Bounded in-memory lookback of raw lines and detected issues.
///
/// Both rings are capped by count and by age. Nothing is persisted.
#[derive(Debug)]
pub struct History {
    max_lines: usize,
    max_issues: usize,
    retention: chrono::Duration,
    lines: VecDeque<Arc<LogLine>>,
    issues: VecDeque<Issue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub minutes: u64,
    pub total_lines: usize,
    pub total_issues: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub sources: BTreeSet<String>,
}

impl History {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            max_lines: config.max_lines,
            max_issues: config.max_issues,
            retention: to_chrono(config.retention),
            lines: VecDeque::new(),
            issues: VecDeque::new(),
        }
    }

    pub fn shared(config: &HistoryConfig) -> SharedHistory {
        Arc::new(Mutex::new(Self::new(config)))
    }

    pub fn record_line(&mut self, line: Arc<LogLine>) {
        let now = line.observed_at;
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
        self.evict(now);
    }

    pub fn record_issue(&mut self, issue: Issue) {
        let now = issue.detected_at;
        self.issues.push_back(issue);
        while self.issues.len() > self.max_issues {
            self.issues.pop_front();
        }
        self.evict(now);
    }

    /// Lines observed within `within` of `now`, oldest first.
    pub fn recent_lines(&self, within: Duration, now: DateTime<Utc>) -> Vec<Arc<LogLine>> {
        let cutoff = now - to_chrono(within);
        self.lines
            .iter()
            .filter(|line| line.observed_at >= cutoff)
            .cloned()
            .collect()
    }

    pub fn recent_issues(&self, within: Duration, now: DateTime<Utc>) -> Vec<&Issue> {
        let cutoff = now - to_chrono(within);
        self.issues
            .iter()
            .filter(|issue| issue.detected_at >= cutoff)
            .collect()
    }

    pub fn summary(&self, within: Duration, now: DateTime<Utc>) -> HistorySummary {
        let lines = self.recent_lines(within, now);
        let issues = self.recent_issues(within, now);
        let count = |severity| issues.iter().filter(|i| i.severity == severity).count();

        HistorySummary {
            minutes: within.as_secs() / 60,
            total_lines: lines.len(),
            total_issues: issues.len(),
            error_count: count(Severity::Error),
            warning_count: count(Severity::Warning),
            sources: lines.iter().map(|l| l.source_id.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        while self.lines.front().is_some_and(|l| l.observed_at < cutoff) {
            self.lines.pop_front();
        }
        while self.issues.front().is_some_and(|i| i.detected_at < cutoff) {
            self.issues.pop_front();
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    // Out-of-range durations clamp to a century so subtraction cannot overflow
    chrono::Duration::from_std(duration)
        .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
        .min(chrono::Duration::weeks(52 * 100))
}

use crate::aggregate::batch::{Batch, BatchScope, FlushReason, Issue};
use crate::config::types::{AggregationScope, BatchingConfig};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Debounce window: idle time after the last issue before a batch closes.
    pub window: Duration,
    pub max_batch_size: Option<usize>,
    /// Longest a batch may stay open, measured from its first issue.
    pub max_batch_age: Option<Duration>,
    pub scope: AggregationScope,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from(&BatchingConfig::default())
    }
}

impl From<&BatchingConfig> for AggregatorConfig {
    fn from(config: &BatchingConfig) -> Self {
        Self {
            window: config.window,
            max_batch_size: config.max_batch_size,
            max_batch_age: config.max_batch_age,
            scope: config.scope,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Idle,
    Accumulating,
}

struct OpenBatch {
    issues: Vec<Issue>,
    sources: BTreeSet<String>,
    opened_at: Instant,
    last_issue_at: Instant,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
}

impl OpenBatch {
    fn new(now: Instant, first: &Issue) -> Self {
        Self {
            issues: Vec::new(),
            sources: BTreeSet::new(),
            opened_at: now,
            last_issue_at: now,
            window_start: first.detected_at,
            window_end: first.detected_at,
        }
    }

    fn push(&mut self, issue: Issue, now: Instant) {
        self.last_issue_at = now;
        self.window_start = self.window_start.min(issue.detected_at);
        self.window_end = self.window_end.max(issue.detected_at);
        self.sources.insert(issue.source_id.clone());
        self.issues.push(issue);
    }

    fn age_deadline(&self, config: &AggregatorConfig) -> Option<Instant> {
        config.max_batch_age.map(|age| self.opened_at + age)
    }

    fn deadline(&self, config: &AggregatorConfig) -> Instant {
        let debounce = self.last_issue_at + config.window;
        match self.age_deadline(config) {
            Some(age) => debounce.min(age),
            None => debounce,
        }
    }

    fn expiry_reason(&self, config: &AggregatorConfig) -> FlushReason {
        match self.age_deadline(config) {
            Some(age) if age <= self.last_issue_at + config.window => FlushReason::MaxAge,
            _ => FlushReason::Debounce,
        }
    }
}

/// Debounce-with-ceiling batching state machine.
///
/// Time is passed in explicitly so the machine stays synchronous; the task in
/// [`crate::aggregate::runner`] owns the timer. At most one batch is open per
/// scope. An issue offered at exactly a batch's deadline joins that batch;
/// only batches whose deadline is strictly earlier are closed first.
pub struct Aggregator {
    config: AggregatorConfig,
    open: BTreeMap<BatchScope, OpenBatch>,
    next_sequence: u64,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            open: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Add an issue observed at `now`. Returns batches closed as a result,
    /// in flush order: overdue batches first, then this issue's batch if it
    /// hit a ceiling.
    pub fn offer(&mut self, issue: Issue, now: Instant) -> Vec<Batch> {
        let mut flushed = self.expire_where(|deadline| deadline < now);

        let scope = BatchScope::for_issue(self.config.scope, &issue);
        let batch = self
            .open
            .entry(scope.clone())
            .or_insert_with(|| OpenBatch::new(now, &issue));
        batch.push(issue, now);

        let size_hit = self
            .config
            .max_batch_size
            .is_some_and(|max| batch.issues.len() >= max);
        let age_hit = batch.age_deadline(&self.config).is_some_and(|age| now >= age);

        let reason = if size_hit {
            Some(FlushReason::MaxSize)
        } else if age_hit {
            Some(FlushReason::MaxAge)
        } else {
            None
        };
        if let Some(reason) = reason {
            if let Some(batch) = self.open.remove(&scope) {
                flushed.push(self.close(scope, batch, reason));
            }
        }

        flushed
    }

    /// Close every batch whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<Batch> {
        self.expire_where(|deadline| deadline <= now)
    }

    /// Close all open batches regardless of timers.
    pub fn drain(&mut self) -> Vec<Batch> {
        let mut open: Vec<(BatchScope, OpenBatch)> =
            std::mem::take(&mut self.open).into_iter().collect();
        open.sort_by_key(|(_, batch)| batch.opened_at);
        open.into_iter()
            .map(|(scope, batch)| self.close(scope, batch, FlushReason::Shutdown))
            .collect()
    }

    /// Earliest instant at which an open batch will close on its own.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.open
            .values()
            .map(|batch| batch.deadline(&self.config))
            .min()
    }

    pub fn state(&self, scope: &BatchScope) -> AggregatorState {
        if self.open.contains_key(scope) {
            AggregatorState::Accumulating
        } else {
            AggregatorState::Idle
        }
    }

    pub fn is_idle(&self) -> bool {
        self.open.is_empty()
    }

    pub fn open_batches(&self) -> usize {
        self.open.len()
    }

    pub fn pending_issues(&self) -> usize {
        self.open.values().map(|batch| batch.issues.len()).sum()
    }

    fn expire_where(&mut self, due: impl Fn(Instant) -> bool) -> Vec<Batch> {
        let mut expired: Vec<(Instant, BatchScope)> = self
            .open
            .iter()
            .map(|(scope, batch)| (batch.deadline(&self.config), scope.clone()))
            .filter(|(deadline, _)| due(*deadline))
            .collect();
        expired.sort();

        let mut flushed = Vec::with_capacity(expired.len());
        for (_, scope) in expired {
            if let Some(batch) = self.open.remove(&scope) {
                let reason = batch.expiry_reason(&self.config);
                flushed.push(self.close(scope, batch, reason));
            }
        }
        flushed
    }

    fn close(&mut self, scope: BatchScope, batch: OpenBatch, reason: FlushReason) -> Batch {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Batch {
            id: Uuid::new_v4(),
            sequence,
            scope,
            issues: batch.issues,
            window_start: batch.window_start,
            window_end: batch.window_end,
            sources: batch.sources,
            reason,
        }
    }
}

use crate::source::LogLine;
use std::collections::VecDeque;
use std::sync::Arc;

/// Ring buffer of the most recent lines seen on one source.
///
/// Owned by that source's reader task. A snapshot is a fresh `Vec` of shared
/// line handles, so later pushes never alter an already-taken snapshot.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    capacity: usize,
    lines: VecDeque<Arc<LogLine>>,
}

impl ContextWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a line, evicting the oldest once full.
    pub fn push(&mut self, line: Arc<LogLine>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<LogLine>> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

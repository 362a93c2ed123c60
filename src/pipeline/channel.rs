use crate::aggregate::{Batch, Issue};
use tokio::sync::mpsc;

pub type IssueSender = mpsc::Sender<Issue>;
pub type IssueReceiver = mpsc::Receiver<Issue>;
pub type BatchSender = mpsc::UnboundedSender<Batch>;
pub type BatchReceiver = mpsc::UnboundedReceiver<Batch>;

/// Bounded queue from the source tasks into the aggregator. A full queue
/// makes source tasks wait; nothing is dropped.
pub fn issue_channel(capacity: usize) -> (IssueSender, IssueReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Queue from the aggregator to the dispatcher. Unbounded so that a slow
/// dispatcher never stalls accumulation of the next batch.
pub fn batch_channel() -> (BatchSender, BatchReceiver) {
    mpsc::unbounded_channel()
}

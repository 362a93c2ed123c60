//! Hand-off point for closed batches.
//!
//! The pipeline calls [`Dispatcher::on_batch`] exactly once per batch, in
//! flush order, from a single dispatcher task. What happens next (analysis,
//! rendering, alerting) belongs to the implementation.

pub mod console;
pub mod json;

use crate::aggregate::Batch;
use crate::classify::Classification;
use crate::source::LogLine;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub use console::ConsoleDispatcher;
pub use json::JsonDispatcher;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn on_batch(&self, batch: Batch);

    /// Called from source tasks for every line that should be displayed.
    /// Must not block.
    fn on_line(&self, _line: &LogLine, _classification: &Classification) {}
}

/// Forwards batches into a channel. Useful for embedding and tests.
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Batch>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Batch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn on_batch(&self, batch: Batch) {
        if self.tx.send(batch).is_err() {
            debug!("Batch receiver dropped");
        }
    }
}

/// Deliver batches to `dispatcher` one at a time until `input` closes.
/// Returns the number of batches delivered.
pub async fn run_dispatcher(
    mut input: mpsc::UnboundedReceiver<Batch>,
    dispatcher: Arc<dyn Dispatcher>,
) -> u64 {
    let mut delivered = 0;
    while let Some(batch) = input.recv().await {
        debug!(batch_id = %batch.id, sequence = batch.sequence, "Dispatching batch");
        dispatcher.on_batch(batch).await;
        delivered += 1;
    }
    info!(delivered, "Dispatcher shutdown complete");
    delivered
}

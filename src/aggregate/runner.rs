use crate::aggregate::aggregator::{Aggregator, AggregatorConfig};
use crate::aggregate::batch::{Batch, Issue};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorReport {
    pub issues_received: u64,
    pub batches_flushed: u64,
}

/// Run the aggregation task.
///
/// Sole owner of the open batches. Issues arrive over `input` from every
/// source task; closed batches go out over the unbounded `output` so a slow
/// dispatcher never holds up accumulation of the next batch. When `input`
/// closes, every open batch is flushed before returning.
///
/// The select is biased towards input: an issue that is already queued when
/// the timer fires is offered first, stamped with the current instant, and
/// the aggregator's tie-break decides whether it joins the expiring batch.
pub async fn run_aggregator(
    mut input: mpsc::Receiver<Issue>,
    output: mpsc::UnboundedSender<Batch>,
    config: AggregatorConfig,
) -> AggregatorReport {
    let mut aggregator = Aggregator::new(config);
    let mut report = AggregatorReport::default();

    let timer = sleep_until(Instant::now());
    tokio::pin!(timer);

    info!(
        window = ?aggregator.config().window,
        scope = ?aggregator.config().scope,
        "Aggregator started"
    );

    loop {
        let deadline = aggregator.next_deadline();
        if let Some(deadline) = deadline {
            if timer.deadline() != deadline {
                timer.as_mut().reset(deadline);
            }
        }

        tokio::select! {
            biased;

            received = input.recv() => {
                match received {
                    Some(issue) => {
                        report.issues_received += 1;
                        debug!(
                            source_id = %issue.source_id,
                            severity = %issue.severity,
                            sequence = issue.trigger.sequence,
                            "Issue received"
                        );
                        let flushed = aggregator.offer(issue, Instant::now());
                        emit(flushed, &output, &mut report);
                    }
                    None => {
                        info!(
                            pending = aggregator.pending_issues(),
                            "Issue channel closed, flushing open batches"
                        );
                        emit(aggregator.drain(), &output, &mut report);
                        break;
                    }
                }
            }

            () = &mut timer, if deadline.is_some() => {
                emit(aggregator.expire(Instant::now()), &output, &mut report);
            }
        }
    }

    info!(
        issues = report.issues_received,
        batches = report.batches_flushed,
        "Aggregator shutdown complete"
    );
    report
}

fn emit(batches: Vec<Batch>, output: &mpsc::UnboundedSender<Batch>, report: &mut AggregatorReport) {
    for batch in batches {
        report.batches_flushed += 1;
        info!(
            batch_id = %batch.id,
            sequence = batch.sequence,
            scope = %batch.scope,
            reason = %batch.reason,
            issues = batch.len(),
            "Batch flushed"
        );
        if let Err(mpsc::error::SendError(lost)) = output.send(batch) {
            error!(
                batch_id = %lost.id,
                issues = lost.len(),
                "Dispatcher channel closed, batch not delivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::batch::FlushReason;
    use crate::classify::Classification;
    use crate::source::LogLine;
    use std::sync::Arc;
    use std::time::Duration;

    fn issue(text: &str) -> Issue {
        Issue::from_classification(
            &Classification::Warning {
                matched: "slow".to_string(),
            },
            Arc::new(LogLine::new("app", 0, text)),
            Vec::new(),
        )
        .unwrap()
    }

    fn spawn(
        window: Duration,
    ) -> (
        mpsc::Sender<Issue>,
        mpsc::UnboundedReceiver<Batch>,
        tokio::task::JoinHandle<AggregatorReport>,
    ) {
        let (issue_tx, issue_rx) = mpsc::channel(16);
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let config = AggregatorConfig {
            window,
            ..Default::default()
        };
        let handle = tokio::spawn(run_aggregator(issue_rx, batch_tx, config));
        (issue_tx, batch_rx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_after_quiet_window() {
        let (tx, mut rx, handle) = spawn(Duration::from_secs(10));

        tx.send(issue("a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(issue("b")).await.unwrap();

        // 9s after the last issue nothing has flushed yet
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.reason, FlushReason::Debounce);

        drop(tx);
        let report = handle.await.unwrap();
        assert_eq!(report.issues_received, 2);
        assert_eq!(report.batches_flushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_input_forces_final_flush() {
        let (tx, mut rx, handle) = spawn(Duration::from_secs(60));

        tx.send(issue("a")).await.unwrap();
        drop(tx);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.reason, FlushReason::Shutdown);
        assert_eq!(batch.len(), 1);
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.await.unwrap().batches_flushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_dispatcher_does_not_stop_aggregation() {
        let (tx, rx, handle) = spawn(Duration::from_secs(1));
        drop(rx);

        tx.send(issue("a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(tx);

        let report = handle.await.unwrap();
        assert_eq!(report.batches_flushed, 1);
    }
}

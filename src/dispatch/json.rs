use crate::aggregate::Batch;
use crate::classify::Classification;
use crate::dispatch::Dispatcher;
use crate::source::LogLine;
use async_trait::async_trait;
use serde::Serialize;
use tracing::error;

/// Writes one JSON object per batch to stdout. When `lines` is set, every
/// displayed line is also written as `{"type":"line", ...}`.
#[derive(Debug, Clone, Default)]
pub struct JsonDispatcher {
    lines: bool,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record<'a> {
    Batch(&'a Batch),
    Line {
        #[serde(flatten)]
        line: &'a LogLine,
        classification: &'a Classification,
    },
}

impl JsonDispatcher {
    pub fn new(lines: bool) -> Self {
        Self { lines }
    }

    pub fn encode_batch(batch: &Batch) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Record::Batch(batch))
    }

    pub fn encode_line(
        line: &LogLine,
        classification: &Classification,
    ) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Record::Line {
            line,
            classification,
        })
    }
}

#[async_trait]
impl Dispatcher for JsonDispatcher {
    async fn on_batch(&self, batch: Batch) {
        match Self::encode_batch(&batch) {
            Ok(json) => println!("{}", json),
            Err(e) => error!(batch_id = %batch.id, error = %e, "Failed to encode batch"),
        }
    }

    fn on_line(&self, line: &LogLine, classification: &Classification) {
        if !self.lines {
            return;
        }
        match Self::encode_line(line, classification) {
            Ok(json) => println!("{}", json),
            Err(e) => error!(source_id = %line.source_id, error = %e, "Failed to encode line"),
        }
    }
}

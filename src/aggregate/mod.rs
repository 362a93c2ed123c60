pub mod aggregator;
pub mod batch;
pub mod runner;

pub use aggregator::{Aggregator, AggregatorConfig, AggregatorState};
pub use batch::{Batch, BatchScope, FlushReason, Issue};
pub use runner::{run_aggregator, AggregatorReport};

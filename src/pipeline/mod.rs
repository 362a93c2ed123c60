pub mod channel;
pub mod runner;

pub use channel::{batch_channel, issue_channel};
pub use runner::{Pipeline, PipelineError, PipelineOptions, PipelineReport, SourceReport};

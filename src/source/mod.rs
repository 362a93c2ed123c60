pub mod backoff;
pub mod container;
pub mod file;
pub mod line;
pub mod reader;
pub mod stdin;

use crate::config::types::{PipelineConfig, SourceConfig};
use container::{BollardLogApi, ContainerSource};
use file::FileSource;
use std::sync::Arc;
use stdin::StdinSource;

pub use line::{LogLine, SourceKind};
pub use reader::{LineSource, RawLine, SourceError, SourceReader, SourceState};

/// Build the reader for one configured source.
pub fn reader_from_config(
    source_id: &str,
    config: &SourceConfig,
    pipeline: &PipelineConfig,
) -> Result<SourceReader, SourceError> {
    let inner: Box<dyn LineSource> = match config {
        SourceConfig::File { path, read } => {
            Box::new(FileSource::new(source_id, path, read.clone(), pipeline))
        }
        SourceConfig::Stdin => Box::new(StdinSource::stdin(source_id)),
        SourceConfig::Container {
            container,
            tail,
            docker_socket,
        } => {
            let api = match docker_socket {
                Some(socket) => BollardLogApi::connect_with_socket(socket),
                None => BollardLogApi::connect_local(),
            }
            .map_err(|e| SourceError::Unreachable {
                source_id: source_id.to_string(),
                attempts: 1,
                reason: e.to_string(),
            })?;
            Box::new(ContainerSource::new(
                source_id,
                container,
                *tail,
                Arc::new(api),
                &pipeline.retry,
            ))
        }
    };

    Ok(SourceReader::new(source_id, inner))
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sources: HashMap<String, SourceConfig>,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Config with the given sources and every other section at its default.
    pub fn with_sources(sources: HashMap<String, SourceConfig>) -> Self {
        Self {
            sources,
            detection: DetectionConfig::default(),
            context: ContextConfig::default(),
            batching: BatchingConfig::default(),
            output: OutputConfig::default(),
            history: HistoryConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    File {
        path: PathBuf,
        #[serde(default)]
        read: ReadConfig,
    },
    Stdin,
    Container {
        container: String,
        /// Lines of existing history to replay on first connect; `~` replays all.
        #[serde(default = "default_tail")]
        tail: Option<u64>,
        #[serde(default)]
        docker_socket: Option<String>,
    },
}

fn default_tail() -> Option<u64> {
    Some(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    pub start: ReadStart,
    pub follow: bool,
    /// Resume from this byte offset instead of `start`.
    pub offset: Option<u64>,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            start: ReadStart::End,
            follow: true,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStart {
    Beginning,
    End,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub min_severity: MinSeverity,
    pub ignore_patterns: Vec<String>,
    pub extra_error_patterns: Vec<String>,
    pub extra_warning_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinSeverity {
    #[default]
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub lines: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { lines: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_batch_size: Option<usize>,
    #[serde(with = "humantime_serde")]
    pub max_batch_age: Option<Duration>,
    pub scope: AggregationScope,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            max_batch_size: None,
            max_batch_age: None,
            scope: AggregationScope::Global,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationScope {
    #[default]
    Global,
    PerSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub quiet: bool,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Console,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_lines: usize,
    pub max_issues: usize,
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_lines: 10_000,
            max_issues: 1_000,
            retention: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            poll_interval: Duration::from_millis(100),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

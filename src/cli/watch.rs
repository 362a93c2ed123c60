use crate::cli::run::run_config;
use crate::config::parse::validate_config;
use crate::config::types::{
    AggregationScope, Config, OutputFormat, ReadConfig, ReadStart, SourceConfig,
};
use crate::config::expand_tilde;
use clap::{Args, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Sources to watch: a file path, `-` for stdin, or `docker:NAME`
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Only show flagged lines
    #[arg(short, long)]
    pub quiet: bool,

    /// Lines of context to attach to each issue
    #[arg(short, long, default_value_t = 5)]
    pub context: usize,

    /// Seconds of quiet before a batch closes
    #[arg(short = 'w', long, default_value_t = 10.0)]
    pub batch_window: f64,

    /// Close a batch once it holds this many issues
    #[arg(long)]
    pub max_batch_size: Option<usize>,

    /// Close a batch once it has been open this many seconds
    #[arg(long)]
    pub max_batch_age: Option<f64>,

    #[arg(long, value_enum, default_value_t = ScopeArg::Global)]
    pub scope: ScopeArg,

    /// Read files from the beginning instead of only new lines
    #[arg(long)]
    pub from_start: bool,

    /// Flag errors only
    #[arg(long)]
    pub errors_only: bool,

    #[arg(long, value_enum, default_value_t = FormatArg::Console)]
    pub format: FormatArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    Global,
    PerSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Console,
    Json,
}

/// Parse one source argument into an id and its config.
pub fn parse_source_arg(arg: &str, from_start: bool) -> (String, SourceConfig) {
    if arg == "-" {
        return ("stdin".to_string(), SourceConfig::Stdin);
    }
    if let Some(name) = arg.strip_prefix("docker:") {
        return (
            arg.to_string(),
            SourceConfig::Container {
                container: name.to_string(),
                tail: Some(0),
                docker_socket: None,
            },
        );
    }
    let read = ReadConfig {
        start: if from_start {
            ReadStart::Beginning
        } else {
            ReadStart::End
        },
        follow: true,
        offset: None,
    };
    (
        arg.to_string(),
        SourceConfig::File {
            path: expand_tilde(&PathBuf::from(arg)),
            read,
        },
    )
}

fn seconds(value: f64, flag: &str) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("invalid --{flag} value {value}: {e}"))
}

/// Build a full config from command-line arguments.
pub fn config_from_args(args: &WatchArgs) -> Result<Config, Box<dyn std::error::Error>> {
    let mut sources = HashMap::new();
    for arg in &args.sources {
        let (id, source) = parse_source_arg(arg, args.from_start);
        if sources.insert(id.clone(), source).is_some() {
            return Err(format!("source given twice: {id}").into());
        }
    }

    let mut config = Config::with_sources(sources);
    config.context.lines = args.context;
    config.batching.window = seconds(args.batch_window, "batch-window")?;
    config.batching.max_batch_size = args.max_batch_size;
    config.batching.max_batch_age = args
        .max_batch_age
        .map(|age| seconds(age, "max-batch-age"))
        .transpose()?;
    config.batching.scope = match args.scope {
        ScopeArg::Global => AggregationScope::Global,
        ScopeArg::PerSource => AggregationScope::PerSource,
    };
    config.output.quiet = args.quiet;
    config.output.format = match args.format {
        FormatArg::Console => OutputFormat::Console,
        FormatArg::Json => OutputFormat::Json,
    };
    if args.errors_only {
        config.detection.min_severity = crate::config::types::MinSeverity::Error;
    }

    validate_config(&config)?;
    Ok(config)
}

pub async fn watch(args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = config_from_args(&args)?;
    run_config(&config).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        watch: WatchArgs,
    }

    fn parse(args: &[&str]) -> WatchArgs {
        TestCli::parse_from(std::iter::once("hawkeye").chain(args.iter().copied())).watch
    }

    #[test]
    fn test_source_argument_forms() {
        assert!(matches!(parse_source_arg("-", false).1, SourceConfig::Stdin));

        let (id, source) = parse_source_arg("docker:web-1", false);
        assert_eq!(id, "docker:web-1");
        assert!(matches!(source, SourceConfig::Container { ref container, .. } if container == "web-1"));

        let (_, source) = parse_source_arg("/var/log/app.log", true);
        match source {
            SourceConfig::File { path, read } => {
                assert_eq!(path, PathBuf::from("/var/log/app.log"));
                assert_eq!(read.start, ReadStart::Beginning);
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn test_args_map_onto_config() {
        let args = parse(&[
            "-q",
            "--context",
            "2",
            "--batch-window",
            "2.5",
            "--max-batch-size",
            "20",
            "--scope",
            "per-source",
            "app.log",
            "docker:db",
        ]);
        let config = config_from_args(&args).unwrap();
        assert!(config.output.quiet);
        assert_eq!(config.context.lines, 2);
        assert_eq!(config.batching.window, Duration::from_millis(2500));
        assert_eq!(config.batching.max_batch_size, Some(20));
        assert_eq!(config.batching.scope, AggregationScope::PerSource);
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn test_two_stdin_sources_rejected() {
        let args = parse(&["-", "-"]);
        assert!(config_from_args(&args).is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let args = parse(&["--batch-window", "0", "app.log"]);
        assert!(config_from_args(&args).is_err());
    }
}

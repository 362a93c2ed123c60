use super::types::*;
use crate::classify::Classifier;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use std::path::Path;
use thiserror::Error;

/// Largest accepted `context.lines`.
pub const MAX_CONTEXT_LINES: usize = 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string)
}

/// Parse and validate config from a YAML string.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml: &str) -> Result<(), ConfigError> {
    let unexpanded = unexpanded_env_vars(yaml);

    match unexpanded.as_slice() {
        [] => Ok(()),
        [single] => Err(ConfigError::Validation(format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            single
        ))),
        many => Err(ConfigError::Validation(format!(
            "Environment variables are not set: {}",
            many.join(", ")
        ))),
    }
}

fn expand_paths(config: &mut Config) {
    for source in config.sources.values_mut() {
        if let SourceConfig::File { path, .. } = source {
            *path = expand_tilde(path);
        }
    }
}

/// Check every section and report all problems at once.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.sources.is_empty() {
        errors.push("at least one source must be configured".to_string());
    }

    let stdin_sources: Vec<&String> = config
        .sources
        .iter()
        .filter(|(_, source)| matches!(source, SourceConfig::Stdin))
        .map(|(id, _)| id)
        .collect();
    if stdin_sources.len() > 1 {
        let mut ids: Vec<&str> = stdin_sources.iter().map(|id| id.as_str()).collect();
        ids.sort_unstable();
        errors.push(format!(
            "only one stdin source is allowed, found: {}",
            ids.join(", ")
        ));
    }

    let mut source_ids: Vec<&String> = config.sources.keys().collect();
    source_ids.sort();
    for id in source_ids {
        if id.trim().is_empty() {
            errors.push("source ids must not be empty".to_string());
        }
        match &config.sources[id] {
            SourceConfig::File { path, .. } if path.as_os_str().is_empty() => {
                errors.push(format!("source '{}': file path must not be empty", id));
            }
            SourceConfig::Container { container, .. } if container.trim().is_empty() => {
                errors.push(format!("source '{}': container name must not be empty", id));
            }
            _ => {}
        }
    }

    if config.context.lines > MAX_CONTEXT_LINES {
        errors.push(format!(
            "context.lines must be at most {}, got {}",
            MAX_CONTEXT_LINES, config.context.lines
        ));
    }

    if config.batching.window.is_zero() {
        errors.push("batching.window must be greater than zero".to_string());
    }
    if config.batching.max_batch_size == Some(0) {
        errors.push("batching.max_batch_size must be at least 1".to_string());
    }
    if config.batching.max_batch_age.is_some_and(|age| age.is_zero()) {
        errors.push("batching.max_batch_age must be greater than zero".to_string());
    }

    if config.pipeline.channel_capacity == 0 {
        errors.push("pipeline.channel_capacity must be at least 1".to_string());
    }
    if config.pipeline.retry.initial_backoff > config.pipeline.retry.max_backoff {
        errors.push("pipeline.retry.initial_backoff must not exceed max_backoff".to_string());
    }

    if let Err(e) = Classifier::new(&config.detection) {
        errors.push(format!("detection: {}", e));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINIMAL: &str = r#"
sources:
  app:
    type: file
    path: /var/log/app.log
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.context.lines, 5);
        assert_eq!(config.batching.window, Duration::from_secs(10));
        assert_eq!(config.batching.scope, AggregationScope::Global);
        assert!(config.batching.max_batch_size.is_none());
        assert!(!config.output.quiet);

        match &config.sources["app"] {
            SourceConfig::File { path, read } => {
                assert_eq!(path, Path::new("/var/log/app.log"));
                assert_eq!(read.start, ReadStart::End);
                assert!(read.follow);
            }
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_all_source_kinds() {
        let yaml = r#"
sources:
  app:
    type: file
    path: /var/log/app.log
    read:
      start: beginning
      follow: false
      offset: 128
  piped:
    type: stdin
  web:
    type: container
    container: web-1
batching:
  window: 2s
  max_batch_size: 20
  max_batch_age: 1m
  scope: per_source
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.sources.len(), 3);
        assert!(matches!(config.sources["piped"], SourceConfig::Stdin));
        match &config.sources["web"] {
            SourceConfig::Container { container, tail, .. } => {
                assert_eq!(container, "web-1");
                assert_eq!(*tail, Some(0));
            }
            other => panic!("unexpected source: {:?}", other),
        }
        match &config.sources["app"] {
            SourceConfig::File { read, .. } => assert_eq!(read.offset, Some(128)),
            other => panic!("unexpected source: {:?}", other),
        }
        assert_eq!(config.batching.window, Duration::from_secs(2));
        assert_eq!(config.batching.max_batch_size, Some(20));
        assert_eq!(config.batching.max_batch_age, Some(Duration::from_secs(60)));
        assert_eq!(config.batching.scope, AggregationScope::PerSource);
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let yaml = r#"
sources:
  a:
    type: stdin
  b:
    type: stdin
  c:
    type: container
    container: ""
batching:
  window: 0s
  max_batch_size: 0
"#;
        let err = parse_config(yaml).unwrap_err();
        let ConfigError::ValidationList(errors) = err else {
            panic!("expected validation list, got {err}");
        };
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors[0].contains("only one stdin source"));
        assert!(errors.iter().any(|e| e.contains("container name")));
        assert!(errors.iter().any(|e| e.contains("batching.window")));
        assert!(errors.iter().any(|e| e.contains("max_batch_size")));
    }

    #[test]
    fn test_bad_detection_pattern_rejected() {
        let yaml = r#"
sources:
  app:
    type: stdin
detection:
  extra_error_patterns: ["[broken"]
"#;
        let err = parse_config(yaml).unwrap_err();
        assert!(err.to_string().contains("[broken"));
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let yaml = r#"
sources:
  app:
    type: file
    path: $env{HAWKEYE_SURELY_UNSET}/app.log
"#;
        let err = parse_config(yaml).unwrap_err();
        assert!(err.to_string().contains("HAWKEYE_SURELY_UNSET"));
    }

    #[test]
    fn test_empty_sources_rejected() {
        let err = parse_config("sources: {}\n").unwrap_err();
        assert!(err.to_string().contains("at least one source"));
    }
}

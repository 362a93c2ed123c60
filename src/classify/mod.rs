pub mod patterns;

use crate::config::types::{DetectionConfig, MinSeverity};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Severity of a flagged line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Outcome of classifying one line. `matched` is the text that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum Classification {
    None,
    Warning { matched: String },
    Error { matched: String },
}

impl Classification {
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Classification::None => None,
            Classification::Warning { .. } => Some(Severity::Warning),
            Classification::Error { .. } => Some(Severity::Error),
        }
    }

    pub fn matched(&self) -> Option<&str> {
        match self {
            Classification::None => None,
            Classification::Warning { matched } | Classification::Error { matched } => {
                Some(matched)
            }
        }
    }

    pub fn is_issue(&self) -> bool {
        !matches!(self, Classification::None)
    }
}

/// Lexical issue detector.
///
/// Holds only compiled patterns, so a single instance can be shared by every
/// source task behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Classifier {
    ignore: Vec<Regex>,
    error: Vec<Regex>,
    extra_error: Vec<Regex>,
    warning: Vec<Regex>,
    extra_warning: Vec<Regex>,
    min_severity: MinSeverity,
}

impl Classifier {
    /// Build a classifier from the built-in keyword sets plus any extra
    /// patterns in the detection config.
    pub fn new(config: &DetectionConfig) -> Result<Self, ClassifierError> {
        Ok(Self {
            ignore: compile_all(config.ignore_patterns.iter().map(String::as_str))?,
            error: compile_all(patterns::ERROR_PATTERNS.iter().copied())?,
            extra_error: compile_all(config.extra_error_patterns.iter().map(String::as_str))?,
            warning: compile_all(patterns::WARNING_PATTERNS.iter().copied())?,
            extra_warning: compile_all(config.extra_warning_patterns.iter().map(String::as_str))?,
            min_severity: config.min_severity,
        })
    }

    /// Classifier with the built-in keyword sets and no ignore rules.
    pub fn builtin() -> Result<Self, ClassifierError> {
        Self::new(&DetectionConfig::default())
    }

    pub fn classify(&self, line: &str) -> Classification {
        if line.trim().is_empty() {
            return Classification::None;
        }

        if self.ignore.iter().any(|re| re.is_match(line)) {
            return Classification::None;
        }

        // Same byte offsets as `line`, so match ranges index either string
        let words = line.replace('_', " ");

        if let Some(range) = first_match(&self.error, &words)
            .or_else(|| first_match(&self.extra_error, line))
        {
            return Classification::Error {
                matched: line[range].to_string(),
            };
        }

        if self.min_severity == MinSeverity::Error {
            return Classification::None;
        }

        match first_match(&self.warning, &words)
            .or_else(|| first_match(&self.extra_warning, line))
        {
            Some(range) => Classification::Warning {
                matched: line[range].to_string(),
            },
            None => Classification::None,
        }
    }

    /// Classify raw bytes. Input that is not valid UTF-8 is never flagged.
    pub fn classify_bytes(&self, bytes: &[u8]) -> Classification {
        match std::str::from_utf8(bytes) {
            Ok(line) => self.classify(line),
            Err(_) => Classification::None,
        }
    }
}

fn first_match(patterns: &[Regex], text: &str) -> Option<Range<usize>> {
    patterns.iter().find_map(|re| re.find(text)).map(|m| m.range())
}

fn compile_all<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<Vec<Regex>, ClassifierError> {
    patterns
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ClassifierError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::builtin().unwrap()
    }

    fn severity_of(line: &str) -> Option<Severity> {
        classifier().classify(line).severity()
    }

    #[test]
    fn test_error_keywords_case_insensitive() {
        let lines = [
            "ERROR db timeout",
            "request failed after 3 attempts",
            "Unhandled exception in worker",
            "CRITICAL: disk array degraded",
            "fatal: unable to access repository",
            "thread main panicked at src/main.rs:10",
            "service crashed unexpectedly",
            "upstream TIMEOUT",
            "connect: Connection refused",
            "permission denied for user bob",
            "401 Unauthorized",
            "403 Forbidden",
            "invalid token",
            "index corrupted on shard 2",
            "java.lang.OutOfMemoryError: Java heap space",
            "kernel: Out of memory: Killed process 1234",
            "oom reaper activated",
            "Segfault at 0x0",
            "job aborted by scheduler",
            "Reason: OOMKilled",
            "net::ERR_CONNECTION_REFUSED",
            "php fatal_error in x",
            "db_error code 7",
            "request_timeout after 30s",
            "upstream status_code=502",
        ];
        for line in lines {
            assert_eq!(severity_of(line), Some(Severity::Error), "line: {line}");
        }
    }

    #[test]
    fn test_warning_keywords() {
        let lines = [
            "WARN cache miss ratio rising",
            "Warning: config key renamed",
            "this endpoint is deprecated",
            "will retry in 5s",
            "slow query took 2300ms",
            "p99 latency above target",
            "message delayed by broker",
            "client throttled by upstream",
            "high cpu on node-3",
            "High memory usage detected",
            "low disk space on /var",
            "WARN_LOW_DISK",
            "cache_slow_path taken",
        ];
        for line in lines {
            assert_eq!(severity_of(line), Some(Severity::Warning), "line: {line}");
        }
    }

    #[test]
    fn test_error_takes_priority_over_warning() {
        let result = classifier().classify("WARN: retry failed, giving up");
        assert_eq!(
            result,
            Classification::Error {
                matched: "failed".to_string()
            }
        );
    }

    #[test]
    fn test_first_matching_pattern_reports_token() {
        let result = classifier().classify("ERROR db timeout");
        assert_eq!(result.matched(), Some("ERROR"));
        assert_eq!(result.severity(), Some(Severity::Error));
    }

    #[test]
    fn test_underscore_joined_match_reports_original_text() {
        let result = classifier().classify("db_error code 7");
        assert_eq!(result.matched(), Some("error"));

        let result = classifier().classify("Reason: OOMKilled");
        assert_eq!(result.matched(), Some("OOMKilled"));
    }

    #[test]
    fn test_plain_lines_are_clean() {
        let lines = [
            "INFO ok",
            "INFO retrying",
            "INFO retrying_connection",
            "GET /index.html 200 512",
            "user logged in",
            "processed 500 records",
            "terrorist movie listings updated",
        ];
        for line in lines {
            assert_eq!(severity_of(line), None, "line: {line}");
        }
    }

    #[test]
    fn test_http_5xx_status() {
        assert_eq!(
            severity_of(r#"10.0.0.1 - - "GET /api HTTP/1.1" 503 17"#),
            Some(Severity::Error)
        );
        assert_eq!(severity_of("upstream status=502"), Some(Severity::Error));
        assert_eq!(severity_of("HTTP/2 500 from origin"), Some(Severity::Error));
        assert_eq!(
            severity_of(r#"10.0.0.1 - - "GET /api HTTP/1.1" 200 503"#),
            None
        );
    }

    #[test]
    fn test_stack_trace_shapes() {
        let lines = [
            "\tat com.example.Service.handle(Service.java:42)",
            "    at Object.<anonymous> (/app/index.js:10:5)",
            r#"  File "/app/main.py", line 12, in <module>"#,
            "goroutine 1 [running]:",
            "Traceback (most recent call last):",
            "Caused by: java.io.EOFException",
        ];
        for line in lines {
            assert_eq!(severity_of(line), Some(Severity::Error), "line: {line}");
        }
    }

    #[test]
    fn test_empty_and_non_utf8_are_clean() {
        let c = classifier();
        assert_eq!(c.classify(""), Classification::None);
        assert_eq!(c.classify("   \t"), Classification::None);
        assert_eq!(
            c.classify_bytes(&[0xff, 0xfe, b'e', b'r', b'r', b'o', b'r']),
            Classification::None
        );
        assert_eq!(
            c.classify_bytes(b"error in module").severity(),
            Some(Severity::Error)
        );
    }

    #[test]
    fn test_min_severity_error_suppresses_warnings() {
        let config = DetectionConfig {
            min_severity: MinSeverity::Error,
            ..Default::default()
        };
        let c = Classifier::new(&config).unwrap();
        assert_eq!(c.classify("WARN disk slow"), Classification::None);
        assert!(c.classify("ERROR disk gone").is_issue());
    }

    #[test]
    fn test_ignore_patterns_checked_first() {
        let config = DetectionConfig {
            ignore_patterns: vec![r"health.?check".to_string()],
            ..Default::default()
        };
        let c = Classifier::new(&config).unwrap();
        assert_eq!(c.classify("healthcheck error: ping"), Classification::None);
        assert!(c.classify("db error").is_issue());
    }

    #[test]
    fn test_extra_patterns_appended() {
        let config = DetectionConfig {
            extra_error_patterns: vec![r"\bE\d{4}\b".to_string()],
            extra_warning_patterns: vec![r"\bquota\b".to_string(), r"job_lag".to_string()],
            ..Default::default()
        };
        let c = Classifier::new(&config).unwrap();
        assert_eq!(c.classify("code E1234 raised").severity(), Some(Severity::Error));
        // Extra patterns see underscores as written
        assert_eq!(c.classify("job_lag=40s").matched(), Some("job_lag"));
        assert_eq!(c.classify("near quota").severity(), Some(Severity::Warning));
    }

    #[test]
    fn test_invalid_extra_pattern_rejected() {
        let config = DetectionConfig {
            extra_error_patterns: vec!["(unclosed".to_string()],
            ..Default::default()
        };
        let err = Classifier::new(&config).unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }
}

pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# HAWKEYE CONFIGURATION
# =============================================================================
# Hawkeye follows log sources, flags lines that look like problems, and groups
# flagged lines (with the lines that preceded them) into batches.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/hawkeye/config.yml
#   3. /etc/hawkeye/config.yml
#
# Values of the form $env{NAME} are replaced with environment variables.
# Durations are written like 500ms, 10s, 5m, 1h.

# =============================================================================
# SOURCES
# =============================================================================
# Each source needs a unique id. Supported types: file, stdin, container.

sources:
  application_log:
    type: file
    path: /var/log/app/app.log
    read:
      # Where to start reading: 'beginning' or 'end'
      start: end
      # Keep watching for new lines after EOF (handles rotation and truncation)
      follow: true
      # Resume from a byte offset reported by a previous run (overrides start)
      # offset: 1024

  # piped:
  #   type: stdin

  # web:
  #   type: container
  #   container: web-1
  #   # Existing lines to replay on first connect; ~ replays everything
  #   tail: 0
  #   # docker_socket: /var/run/docker.sock

# =============================================================================
# DETECTION
# =============================================================================
detection:
  # 'warning' flags warnings and errors, 'error' flags errors only
  min_severity: warning
  # Lines matching any of these are never flagged
  ignore_patterns:
    - 'health.?check'
  # Extra case-insensitive regexes, checked after the built-in keyword sets
  extra_error_patterns: []
  extra_warning_patterns: []

# =============================================================================
# CONTEXT
# =============================================================================
context:
  # Lines before a flagged line to attach, per source
  lines: 5

# =============================================================================
# BATCHING
# =============================================================================
batching:
  # A batch closes after this long with no new issue
  window: 10s
  # Close immediately once a batch holds this many issues
  # max_batch_size: 50
  # Close once a batch has been open this long, even if issues keep coming
  # max_batch_age: 2m
  # 'global' batches across all sources, 'per_source' keeps sources apart
  scope: global

# =============================================================================
# OUTPUT
# =============================================================================
output:
  # Only show flagged lines instead of every line
  quiet: false
  # 'console' or 'json'
  format: console

# =============================================================================
# HISTORY
# =============================================================================
# In-memory lookback used by status summaries. Not persisted.
history:
  max_lines: 10000
  max_issues: 1000
  retention: 60m

# =============================================================================
# PIPELINE
# =============================================================================
pipeline:
  channel_capacity: 1024
  # How often a followed file is checked for new data at EOF
  poll_interval: 100ms
  # Backoff for transient read errors and container reconnects
  retry:
    initial_backoff: 500ms
    max_backoff: 30s
    max_attempts: 5
"#
    .to_string()
}

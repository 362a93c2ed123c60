use crate::aggregate::{Batch, Issue};
use crate::classify::{Classification, Severity};
use crate::dispatch::Dispatcher;
use crate::source::LogLine;
use async_trait::async_trait;
use console::style;
use std::fmt::Write;

/// Terminal renderer: echoes lines as they stream and prints a block per batch.
#[derive(Debug, Clone, Default)]
pub struct ConsoleDispatcher {
    show_source: bool,
}

impl ConsoleDispatcher {
    pub fn new(show_source: bool) -> Self {
        Self { show_source }
    }

    fn prefix(&self, line: &LogLine) -> String {
        if self.show_source {
            format!("{} ", style(format!("[{}]", line.source_id)).cyan())
        } else {
            String::new()
        }
    }

    pub fn render_line(&self, line: &LogLine, classification: &Classification) -> String {
        let prefix = self.prefix(line);
        match classification.severity() {
            Some(Severity::Error) => {
                format!("{}{} {}", prefix, style("[ERR]").red().bold(), style(&line.raw_text).red())
            }
            Some(Severity::Warning) => {
                format!("{}{} {}", prefix, style("[WRN]").yellow(), style(&line.raw_text).yellow())
            }
            None => format!("{}{}", prefix, style(&line.raw_text).dim()),
        }
    }

    pub fn render_batch(&self, batch: &Batch) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}",
            style(format!(
                "── batch #{} · {} issue(s) · {} error(s) · {} warning(s) · {} ──",
                batch.sequence,
                batch.len(),
                batch.error_count(),
                batch.warning_count(),
                batch.reason
            ))
            .bold()
        );
        let _ = writeln!(
            out,
            "{}",
            style(format!(
                "window {} → {} · sources: {}",
                batch.window_start.format("%H:%M:%S%.3f"),
                batch.window_end.format("%H:%M:%S%.3f"),
                batch.sources.iter().cloned().collect::<Vec<_>>().join(", ")
            ))
            .dim()
        );
        for issue in &batch.issues {
            self.render_issue(&mut out, issue);
        }
        out
    }

    fn render_issue(&self, out: &mut String, issue: &Issue) {
        let _ = writeln!(out);
        for line in &issue.context_before {
            let _ = writeln!(out, "    {}{}", self.prefix(line), style(&line.raw_text).dim());
        }
        let tag = match issue.severity {
            Severity::Error => style("[ERROR]").red().bold(),
            Severity::Warning => style("[WARNING]").yellow().bold(),
        };
        let _ = writeln!(
            out,
            ">>> {}{} {}",
            self.prefix(&issue.trigger),
            tag,
            issue.trigger.raw_text
        );
        let _ = writeln!(out, "    {}", style(format!("matched: {}", issue.matched)).dim());
    }
}

#[async_trait]
impl Dispatcher for ConsoleDispatcher {
    async fn on_batch(&self, batch: Batch) {
        println!("\n{}", self.render_batch(&batch));
    }

    fn on_line(&self, line: &LogLine, classification: &Classification) {
        println!("{}", self.render_line(line, classification));
    }
}

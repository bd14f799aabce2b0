use std::time::Duration;

use serde_json::json;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::dispatcher::BatchReport;
use crate::exchange::Exchange;
use crate::response::Response;

/// Renders responses and batch reports for the terminal
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    /// Render the response of a single call
    pub fn format_response(&self, verb: &str, response: &Response) -> serde_json::Result<String> {
        match self.format {
            OutputFormat::Json => response.json_pretty(),
            OutputFormat::Summary => Ok(self.format_status_line(verb, response)),
            OutputFormat::Human => {
                let mut output = self.format_status_line(verb, response);
                output.push('\n');
                output.push_str(&serde_json::to_string_pretty(response.dict())?);

                if self.verbosity >= VerbosityLevel::Verbose {
                    output.push_str("\n\nHeaders:");
                    for (name, value) in response.headers() {
                        output.push_str(&format!("\n  {}: {}", name, value));
                    }
                }
                Ok(output)
            }
        }
    }

    fn format_status_line(&self, verb: &str, response: &Response) -> String {
        let (label, color) = if response.status() == 200 {
            ("✓", "32")
        } else {
            ("✗", "31")
        };

        format!(
            "{}  {} {} {} ({})",
            self.colorize(label, color),
            verb,
            response.status(),
            response.reason(),
            format_duration(response.elapsed())
        )
    }

    /// Render a driven batch
    pub fn format_report(&self, report: &BatchReport) -> serde_json::Result<String> {
        match self.format {
            OutputFormat::Json => self.format_report_json(report),
            OutputFormat::Summary => Ok(self.format_summary(report)),
            OutputFormat::Human => {
                let mut output = String::new();
                if self.verbosity > VerbosityLevel::Quiet {
                    for (index, exchange) in report.exchanges().iter().enumerate() {
                        output.push_str(&self.format_exchange(index, exchange));
                        output.push('\n');
                    }
                    output.push('\n');
                }
                output.push_str(&self.format_summary(report));
                Ok(output)
            }
        }
    }

    fn format_exchange(&self, index: usize, exchange: &Exchange) -> String {
        let elapsed = exchange
            .response()
            .map(|response| format_duration(response.elapsed()))
            .unwrap_or_else(|| "-".to_string());

        match exchange.failure() {
            None => format!(
                "{}  #{} {} ({})",
                self.colorize("✓ OK", "32"),
                index,
                exchange.verb(),
                elapsed
            ),
            Some(failure) => {
                let mut output = format!(
                    "{}  #{} {} ({}) - {}: {}",
                    self.colorize("✗ FAILED", "31"),
                    index,
                    exchange.verb(),
                    elapsed,
                    failure.kind,
                    failure.message
                );
                if self.verbosity >= VerbosityLevel::Verbose {
                    for warning in exchange.warnings() {
                        output.push_str(&format!("\n    warning: {}", warning));
                    }
                }
                output
            }
        }
    }

    fn format_summary(&self, report: &BatchReport) -> String {
        let total = report.exchanges().len();
        let mut output = String::new();
        output.push_str("Batch Summary:\n");
        output.push_str(&format!("  Total exchanges: {}\n", total));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Succeeded:", "32"),
            report.success_count()
        ));

        if report.failure_count() > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failed:", "31"),
                report.failure_count()
            ));
        }

        let rate = if total == 0 {
            100.0
        } else {
            report.success_count() as f64 * 100.0 / total as f64
        };
        output.push_str(&format!("  Success rate: {:.1}%\n", rate));
        output.push_str(&format!("  Rounds: {}\n", report.rounds()));
        output.push_str(&format!("  Duration: {}\n", format_duration(report.elapsed())));

        if self.verbosity >= VerbosityLevel::Verbose && !report.errors().is_empty() {
            output.push_str("\nErrors:\n");
            for entry in report.errors() {
                output.push_str(&format!("  {}\n", entry));
            }
        }
        output
    }

    fn format_report_json(&self, report: &BatchReport) -> serde_json::Result<String> {
        let exchanges: Vec<_> = report
            .exchanges()
            .iter()
            .zip(report.states())
            .map(|(exchange, state)| {
                json!({
                    "verb": exchange.verb(),
                    "state": state.to_string(),
                    "status": exchange.response().map(|response| response.status()),
                    "error": exchange.failure().map(|failure| failure.to_string()),
                    "response": exchange.response().map(|response| response.dict()),
                })
            })
            .collect();

        serde_json::to_string_pretty(&json!({
            "succeeded": report.success_count(),
            "failed": report.failure_count(),
            "rounds": report.rounds(),
            "elapsed_ms": report.elapsed().as_millis() as u64,
            "errors": report.errors(),
            "exchanges": exchanges,
        }))
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}

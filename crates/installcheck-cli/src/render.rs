use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use installcheck_core::{
    CheckLine, CheckStatus, ExecutionReport, LogExcerpt, StageRecord, StageStatus,
};
use installcheck_snapshot::CleanupOutcome;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, no_color: bool) -> OutputStyle {
    if stdout_is_tty && !no_color {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty()),
    )
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", self.status_line(status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        let line = render_section_header(title);
        println!();
        match self.style {
            OutputStyle::Plain => println!("{line}"),
            OutputStyle::Rich => println!("{}", colorize(section_style(), &line)),
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn print_stage(self, record: &StageRecord) {
        if record.status == StageStatus::Skipped {
            self.print_status(
                "skip",
                &format!("{} skipped after an earlier failure", record.name),
            );
            return;
        }
        for check in &record.checks {
            self.print_status(check_status_key(check.status), &check.message);
        }
        if let Some(log) = &record.log {
            self.print_lines(&format_log_excerpt(log));
        }
    }

    /// Spinner shown on stderr while a long external invocation runs. Plain
    /// output gets none.
    pub(crate) fn start_spinner(self, label: &str) -> Option<ProgressBar> {
        if self.style != OutputStyle::Rich {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed}") {
            spinner.set_style(style.tick_chars(".oO@* "));
        }
        spinner.set_message(label.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        Some(spinner)
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    fn status_line(self, status: &str, message: &str) -> String {
        render_status_line(self.style, status, message)
    }
}

pub(crate) fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "fail" => "[FAIL]",
        "warn" => "[WARN]",
        "skip" => "[SKIP]",
        "error" => "[ERR]",
        _ => "[..]",
    }
}

/// Badge plus message. Rich output colors the badge; plain output keeps the
/// bare ASCII badge so logs and pipes stay readable.
pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    let badge = status_badge(status);
    match style {
        OutputStyle::Plain => format!("{badge} {message}"),
        OutputStyle::Rich => format!("{} {message}", colorize(badge_style(status), badge)),
    }
}

pub(crate) fn render_section_header(title: &str) -> String {
    format!("== {title} ==")
}

pub(crate) fn check_status_key(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "ok",
        CheckStatus::Fail => "fail",
        CheckStatus::Warn => "warn",
        CheckStatus::Info => "info",
    }
}

pub(crate) fn format_log_excerpt(log: &LogExcerpt) -> Vec<String> {
    let mut lines = vec![format!("--- tail of {} ---", log.path.display())];
    lines.extend(log.text.lines().map(|line| format!("    {line}")));
    lines.push("---".to_string());
    lines
}

/// Final banner: the verdict line, check totals, and every failed check.
pub(crate) fn format_summary_lines(report: &ExecutionReport, style: OutputStyle) -> Vec<String> {
    let (passed_checks, failed_checks) = report.check_counts();
    let mut lines = Vec::new();
    if report.passed() {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("All {} stages passed", report.stages().len()),
        ));
    } else {
        lines.push(render_status_line(
            style,
            "fail",
            &format!("Failed stages: {}", report.failed_stages().join(", ")),
        ));
        let skipped = report.skipped_stages();
        if !skipped.is_empty() {
            lines.push(render_status_line(
                style,
                "skip",
                &format!("Not run: {}", skipped.join(", ")),
            ));
        }
    }
    lines.push(format!(
        "Checks: {passed_checks} passed, {failed_checks} failed"
    ));
    lines.extend(
        report
            .failed_checks()
            .into_iter()
            .map(|CheckLine { message, .. }| format!("  - {message}")),
    );
    lines
}

pub(crate) fn format_cleanup_lines(outcome: &CleanupOutcome, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if outcome.stopped_child {
        lines.push(render_status_line(
            style,
            "warn",
            "Stopped running external process before restoring",
        ));
    }
    for path in &outcome.restored {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("Restored original {}", path.display()),
        ));
    }
    for entry in &outcome.retained {
        lines.push(render_status_line(
            style,
            "info",
            &format!(
                "Kept test installation at {}; original saved at {}",
                entry.original.display(),
                entry.backup.display()
            ),
        ));
    }
    for failure in &outcome.failures {
        lines.push(render_status_line(style, "error", &format!("Cleanup: {failure}")));
    }
    lines
}

pub(crate) fn format_report_location(path: &Path, style: OutputStyle) -> String {
    render_status_line(style, "info", &format!("JSON report written to {}", path.display()))
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn badge_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "fail" | "error" => AnsiColor::BrightRed,
        "warn" => AnsiColor::BrightYellow,
        "skip" => AnsiColor::BrightBlack,
        _ => AnsiColor::BrightCyan,
    };
    Style::new().fg_color(Some(color.into())).effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

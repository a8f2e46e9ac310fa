use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use localocr_core::{StageFailure, StageId, StageOutcome, StageStatus};
use localocr_installer::{RunJournal, RunResult};

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

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "skip" => "[SKIP]",
        "err" => "[ERR]",
        "warn" => "[WARN]",
        _ => "[..]",
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Rich {
            println!();
            println!("{}", colorize(section_style(), &format!("== {title} ==")));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn start_progress(self, label: &str, total: u64) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(total.max(1));
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {pos:>1}/{len:1} {elapsed_precise}",
            ) {
                progress_bar.set_style(style.tick_chars("|/-\\ ").progress_chars("=>-"));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }
}

impl TerminalProgress {
    pub(crate) fn set(&mut self, current: u64) {
        self.current = current.min(self.total);
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_position(self.current);
        }
    }

    pub(crate) fn set_message(&self, message: &str) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_message(message.to_string());
        }
    }

    /// Prints above the bar while it is drawing.
    pub(crate) fn println(&self, line: &str) {
        match &self.progress_bar {
            Some(progress_bar) => progress_bar.println(line),
            None => println!("{line}"),
        }
    }

    pub(crate) fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };
        progress_bar.finish_and_clear();
        println!(
            "{}",
            render_progress_summary(
                &self.label,
                self.current,
                self.total,
                self.started_at.elapsed()
            )
        );
    }

    pub(crate) fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
        if self.style == OutputStyle::Rich {
            println!(
                "{}",
                colorize(
                    failure_style(),
                    &format!("{} stopped at {}/{}", self.label, self.current, self.total)
                )
            );
        }
    }
}

fn render_progress_summary(label: &str, current: u64, total: u64, elapsed: Duration) -> String {
    format!(
        "{} {}/{} complete in {}",
        colorize(progress_label_style(), label),
        current,
        total,
        format_elapsed(elapsed)
    )
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn failure_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn stage_label(stage: StageId) -> String {
    format!(
        "stage {}/{} {}",
        stage.ordinal(),
        StageId::ALL.len(),
        stage.as_str()
    )
}

pub(crate) fn format_stage_outcome_line(outcome: &StageOutcome, style: OutputStyle) -> String {
    let status = match outcome.status {
        StageStatus::Succeeded => "ok",
        StageStatus::Skipped => "skip",
        StageStatus::Failed => "err",
    };
    render_status_line(
        style,
        status,
        &format!("{}: {}", stage_label(outcome.stage), outcome.status.as_str()),
    )
}

pub(crate) fn format_failure_lines(failure: &StageFailure, style: OutputStyle) -> Vec<String> {
    vec![
        render_status_line(
            style,
            "err",
            &format!("fatal: {}", failure.error.fatal_message()),
        ),
        render_status_line(style, "err", &failure.to_string()),
    ]
}

pub(crate) fn format_stage_status_lines(
    entries: &[(StageId, Result<bool, String>)],
    style: OutputStyle,
) -> Vec<String> {
    entries
        .iter()
        .map(|(stage, state)| match state {
            Ok(true) => render_status_line(
                style,
                "ok",
                &format!("{}: satisfied", stage_label(*stage)),
            ),
            Ok(false) => render_status_line(
                style,
                "step",
                &format!(
                    "{}: missing ({})",
                    stage_label(*stage),
                    stage.description()
                ),
            ),
            Err(reason) => render_status_line(
                style,
                "warn",
                &format!("{}: unknown ({reason})", stage_label(*stage)),
            ),
        })
        .collect()
}

pub(crate) fn format_run_journal_lines(
    journal: Option<&RunJournal>,
    style: OutputStyle,
) -> Vec<String> {
    let Some(journal) = journal else {
        return vec![render_status_line(style, "step", "last run: none recorded")];
    };

    let (status, summary) = match &journal.result {
        RunResult::Succeeded => ("ok", "last run: succeeded".to_string()),
        RunResult::Failed { class } => ("err", format!("last run: failed ({class})")),
    };
    let mut lines = vec![render_status_line(
        style,
        status,
        &format!("{summary} at unix={}", journal.finished_at_unix),
    )];
    lines.extend(
        journal
            .outcomes
            .iter()
            .map(|outcome| format!("  {}: {}", stage_label(outcome.stage), outcome.status.as_str())),
    );
    lines
}

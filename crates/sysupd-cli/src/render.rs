use std::collections::HashMap;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use sysupd_core::{
    AnswerCode, ChangeKind, PackageChange, Question, SyncDbResult, TransactionStep,
};
use sysupd_orchestrator::{
    format_size, MessageLevel, PackageRow, TransactionSummary, UpgradeState, UpgradeUi,
};

use crate::prompt::Prompter;

const OVERALL_SCALE: u64 = 1000;

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
    use std::io::IsTerminal;

    let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    resolve_output_style(std::io::stdout().is_terminal(), no_color)
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "error" => "[ERR]",
                "step" => "[..]",
                "info" => "[::]",
                _ => "[--]",
            };
            format!("{badge} {message}")
        }
    }
}

pub(crate) fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

/// Lines shown before asking to proceed.
pub(crate) fn format_summary_lines(
    summary: &TransactionSummary,
    packages: &[PackageChange],
) -> Vec<String> {
    let mut lines = Vec::with_capacity(packages.len() + 6);
    for package in packages {
        let versions = match (&package.old_version, &package.new_version) {
            (Some(old), Some(new)) => format!("{old} -> {new}"),
            (None, Some(new)) => new.clone(),
            (Some(old), None) => old.clone(),
            (None, None) => String::new(),
        };
        lines.push(format!(
            "{:<10} {} {versions}",
            package.kind().as_str(),
            package.name
        ));
    }
    lines.push(String::new());
    lines.extend(summary.count_lines());
    if summary.download_size > 0 {
        lines.push(format!(
            "total download size: {}",
            format_size(summary.download_size as i64)
        ));
    }
    if summary.count(ChangeKind::Remove) > 0 {
        lines.push(format!(
            "total removed size: {}",
            format_size(summary.removed_size as i64)
        ));
    }
    lines.push(format!("net upgrade size: {}", format_size(summary.size_delta)));
    lines
}

fn database_line(style: OutputStyle, name: &str, result: Option<SyncDbResult>) -> String {
    match result {
        None => render_status_line(style, "step", &format!("synchronizing {name}")),
        Some(SyncDbResult::Success) => {
            render_status_line(style, "ok", &format!("{name} synchronized"))
        }
        Some(SyncDbResult::NotNeeded) => {
            render_status_line(style, "ok", &format!("{name} is up to date"))
        }
        Some(SyncDbResult::Failure) => {
            render_status_line(style, "warn", &format!("{name} failed to synchronize"))
        }
    }
}

struct Bars {
    multi: MultiProgress,
    overall: ProgressBar,
    packages: HashMap<String, ProgressBar>,
}

/// Terminal front end of an upgrade run: an aggregate bar plus one bar per
/// package when the output is a terminal, status lines otherwise.
pub(crate) struct TerminalUi {
    style: OutputStyle,
    prompter: Prompter,
    bars: Option<Bars>,
    step: TransactionStep,
    started_at: Instant,
}

impl TerminalUi {
    pub(crate) fn new(style: OutputStyle, prompter: Prompter) -> Self {
        Self {
            style,
            prompter,
            bars: None,
            step: TransactionStep::None,
            started_at: Instant::now(),
        }
    }

    fn println(&self, line: &str) {
        match &self.bars {
            Some(bars) => {
                let _ = bars.multi.println(line);
            }
            None => println!("{line}"),
        }
    }

    fn bars(&mut self) -> &mut Bars {
        self.bars.get_or_insert_with(|| {
            let multi = MultiProgress::new();
            let overall = multi.add(ProgressBar::new(OVERALL_SCALE));
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<24} [{bar:30.cyan/blue}] {percent:>3}% {elapsed_precise}",
            ) {
                overall.set_style(style.tick_chars("|/-\\ ").progress_chars("=>-"));
            }
            overall.enable_steady_tick(Duration::from_millis(80));
            Bars {
                multi,
                overall,
                packages: HashMap::new(),
            }
        })
    }

    fn package_bar(&mut self, name: &str) -> ProgressBar {
        let bars = self.bars();
        if let Some(bar) = bars.packages.get(name) {
            return bar.clone();
        }
        let bar = bars.multi.add(ProgressBar::new(100));
        if let Ok(style) =
            ProgressStyle::with_template("  {msg:<24} [{bar:20.cyan/blue}] {pos:>3}%")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(name.to_string());
        bars.packages.insert(name.to_string(), bar.clone());
        bar
    }

    /// Clears the bars and prints how long the run took.
    pub(crate) fn finish(mut self) {
        if let Some(bars) = self.bars.take() {
            for bar in bars.packages.values() {
                bar.finish_and_clear();
            }
            bars.overall.finish_and_clear();
            let elapsed = self.started_at.elapsed();
            println!(
                "{}",
                render_status_line(
                    self.style,
                    "ok",
                    &format!("finished in {}", format_elapsed(elapsed))
                )
            );
        }
    }
}

#[async_trait]
impl UpgradeUi for TerminalUi {
    fn state_changed(&mut self, state: &UpgradeState) {
        if matches!(
            state,
            UpgradeState::Idle | UpgradeState::Confirmed | UpgradeState::Done
        ) {
            return;
        }
        if let Some(line) = render_section_header(self.style, &state.to_string()) {
            self.println(&line);
        } else {
            self.println(&render_status_line(self.style, "step", state.label()));
        }
    }

    fn progress(&mut self, fraction: f64, step: TransactionStep) {
        if self.style == OutputStyle::Plain {
            if step != self.step && step != TransactionStep::None {
                self.println(&format!("{} ({:.0}%)", step.label(), fraction * 100.0));
            }
            self.step = step;
            return;
        }
        self.step = step;
        let position = (fraction.clamp(0.0, 1.0) * OVERALL_SCALE as f64).round() as u64;
        let bars = self.bars();
        bars.overall.set_message(step.label().to_string());
        bars.overall.set_position(position);
    }

    fn package_row(&mut self, row: &PackageRow) {
        if self.style == OutputStyle::Plain {
            return;
        }
        let position = if row.done {
            100
        } else if row.percent > 0 {
            u64::from(row.percent)
        } else {
            (row.download_fraction() * 100.0).round() as u64
        };
        let bar = self.package_bar(&row.name);
        bar.set_position(position.min(100));
        if row.done {
            bar.finish();
        }
    }

    fn database(&mut self, name: &str, result: Option<SyncDbResult>) {
        self.println(&database_line(self.style, name, result));
    }

    fn message(&mut self, level: MessageLevel, text: &str) {
        let status = match level {
            MessageLevel::Info => "info",
            MessageLevel::Warning => "warn",
            MessageLevel::Error => "error",
        };
        let line = render_status_line(self.style, status, text);
        match (level, self.style) {
            (MessageLevel::Error, OutputStyle::Rich) => {
                self.println(&colorize(error_style(), &line));
            }
            (MessageLevel::Warning, OutputStyle::Rich) => {
                self.println(&colorize(warning_style(), &line));
            }
            _ => self.println(&line),
        }
    }

    async fn confirm(
        &mut self,
        summary: &TransactionSummary,
        packages: &[PackageChange],
    ) -> bool {
        let lines = format_summary_lines(summary, packages);
        match &self.bars {
            Some(bars) => bars.multi.suspend(|| {
                for line in &lines {
                    println!("{line}");
                }
            }),
            None => {
                for line in &lines {
                    println!("{line}");
                }
            }
        }
        self.prompter.confirm("proceed with the upgrade?", true).await
    }

    async fn answer(&mut self, question: &Question) -> AnswerCode {
        self.prompter.answer(question).await
    }

    fn error(&mut self, message: &str) {
        let line = render_status_line(self.style, "error", message);
        match self.style {
            OutputStyle::Plain => eprintln!("{line}"),
            OutputStyle::Rich => eprintln!("{}", colorize(error_style(), &line)),
        }
    }
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

fn warning_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::Yellow.into()))
}

fn error_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

use crate::core::models::{BuildReport, Target};
use crate::core::services::{RunSummary, TaskObserver};
use crate::core::watch::WatchEvent;
use crate::utils::{format_size, LibpackError};
use colored::*;
use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// One spinner line per target: `Waiting - `, then `Bundling - `, then the written size
pub struct BuildUI {
    multi: MultiProgress,
    bars: DashMap<PathBuf, ProgressBar>,
    start_time: Instant,
}

impl BuildUI {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: DashMap::new(),
            start_time: Instant::now(),
        }
    }

    pub fn show_banner(&self) {
        println!("\n  {} {}", "LIBPACK".bright_cyan().bold(), format!("v{}", env!("CARGO_PKG_VERSION")).bright_white());
        println!();
    }

    fn spinner(&self, output: &Path) -> ProgressBar {
        self.bars
            .entry(output.to_path_buf())
            .or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("  {spinner:.blue} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"]),
                );
                pb.enable_steady_tick(Duration::from_millis(80));
                pb
            })
            .clone()
    }

    pub fn show_completion(&self, summary: &RunSummary) {
        println!();
        for report in &summary.secondary {
            println!("  {} {}", "✓".bright_green(), report_line(report));
        }
        println!(
            "  {} built {} files in {}",
            "✓".bright_green(),
            summary.targets.len() + summary.secondary.len(),
            format!("{:.0}ms", self.start_time.elapsed().as_secs_f64() * 1000.0)
                .bright_white()
                .bold()
        );
    }

    /// Print one watch lifecycle event
    pub fn watch_event(event: &WatchEvent) {
        let output = event.output().display().to_string();
        match event {
            WatchEvent::Start { .. } => {}
            WatchEvent::BundleStart { .. } => {
                println!("  {} {}", "Bundling -".bright_black(), output.bright_cyan());
            }
            WatchEvent::BundleEnd { duration, report, .. } => {
                println!(
                    "  {} {} {}",
                    "✓".bright_green(),
                    report_line(report),
                    format!("in {:.0}ms", duration.as_secs_f64() * 1000.0).bright_black()
                );
            }
            WatchEvent::End { .. } => {}
            WatchEvent::Error { error, .. } => {
                eprintln!("  {} {}", "✗".bright_red(), output.bright_cyan());
                eprintln!("{}", crate::utils::diagnostics::format_error(error));
            }
            WatchEvent::Fatal { message, .. } => {
                eprintln!("  {} {} {}", "✗".bright_red(), output.bright_cyan(), message.red());
            }
        }
    }
}

impl Default for BuildUI {
    fn default() -> Self {
        Self::new()
    }
}

fn report_line(report: &BuildReport) -> String {
    let size = format!("({})", format_size(report.size)).bright_black();
    match report.gzipped {
        Some(gzipped) => format!(
            "{} {} {}",
            report.output.display().to_string().bright_cyan(),
            size,
            format!("gzip {}", format_size(gzipped)).bright_black()
        ),
        None => format!("{} {}", report.output.display().to_string().bright_cyan(), size),
    }
}

impl TaskObserver for BuildUI {
    fn waiting(&self, target: &Target) {
        self.spinner(&target.output)
            .set_message(format!("{} {}", "Waiting -".dimmed(), target.output.display()));
    }

    fn started(&self, target: &Target) {
        self.spinner(&target.output)
            .set_message(format!("{} {}", "Bundling -".bright_black(), target.output.display()));
    }

    fn finished(&self, target: &Target, report: &BuildReport) {
        self.spinner(&target.output).finish_with_message(report_line(report));
    }

    fn failed(&self, target: &Target, error: &LibpackError) {
        self.spinner(&target.output).abandon_with_message(format!(
            "{} {} {}",
            "✗".bright_red(),
            target.output.display(),
            error.to_string().red()
        ));
    }
}

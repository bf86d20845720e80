//! Terminal rendering of run reports

use brick_core::{LogEntry, LogLevel, RunReport, StepOutcome, StepStatus};
use colored::*;
use std::time::Duration;

/// Prints one line per step, the output of failed steps and a final verdict
pub fn print_report(report: &RunReport) {
    println!();
    println!("{}", "Summary:".bold());
    for outcome in &report.outcomes {
        print_outcome(outcome);
    }

    let failed = report.with_status(StepStatus::Failed);
    for id in &failed {
        if let Some(outcome) = report.get(id) {
            print_failure(outcome);
        }
    }

    println!();
    println!("{}", verdict(report));
}

fn print_outcome(outcome: &StepOutcome) {
    let mut line = format!(
        "  {} {:<32} {}",
        "▸".cyan(),
        outcome.id.to_string(),
        colorize_status(&outcome.status)
    );
    if outcome.status == StepStatus::Succeeded || outcome.status == StepStatus::Failed {
        line.push_str(&format!(" {}", format_duration(outcome.duration).dimmed()));
    }
    if let (StepStatus::Blocked, Some(reason)) = (outcome.status, &outcome.error_message) {
        line.push_str(&format!(" {}", format!("({})", reason).dimmed()));
    }
    println!("{}", line);
}

fn print_failure(outcome: &StepOutcome) {
    println!();
    println!("{}", format!("Output of {}:", outcome.id).bold());
    println!("{}", "─".repeat(80).dimmed());
    for log in &outcome.output {
        print_log_entry(log);
    }
    println!("{}", "─".repeat(80).dimmed());
    if let Some(error) = &outcome.error_message {
        println!("{}", error.red());
    }
}

/// Print a log entry
fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

/// Colorize step status for display
fn colorize_status(status: &StepStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        StepStatus::Pending => status_str.dimmed(),
        StepStatus::Running => status_str.cyan(),
        StepStatus::Skipped => status_str.dimmed(),
        StepStatus::Succeeded => status_str.green(),
        StepStatus::Failed => status_str.red(),
        StepStatus::Blocked => status_str.yellow(),
    }
}

fn verdict(report: &RunReport) -> ColoredString {
    let failed = report.with_status(StepStatus::Failed).len();
    let blocked = report.with_status(StepStatus::Blocked).len();
    if failed == 0 && blocked == 0 {
        let ran = report.with_status(StepStatus::Succeeded).len();
        let skipped = report.with_status(StepStatus::Skipped).len();
        format!("✓ {} ran, {} up to date", ran, skipped)
            .green()
            .bold()
    } else {
        format!("✗ {} failed, {} blocked", failed, blocked)
            .red()
            .bold()
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{}m{:02}s", duration.as_secs() / 60, duration.as_secs() % 60)
    }
}

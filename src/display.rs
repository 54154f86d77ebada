//! Colored CLI display utilities for supervised rsync runs.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::classify::RsyncVariant;
use crate::supervisor::{RunReport, SupervisorError};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for error reasons before truncation.
const MAX_REASON_LEN: usize = 200;

/// Truncate a string to a maximum length, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Format an argument list the way it would be typed.
#[must_use]
pub fn format_args_line(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print launch information.
pub fn print_launch(executable: &str, args: &[String], correlation_id: &str) {
    println!(
        "{} {} {} {} {}",
        timestamp().dimmed(),
        "[RSYNC]".blue().bold(),
        executable.cyan(),
        format_args_line(args),
        format!("id={correlation_id}").dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print one line of rsync output.
pub fn print_line(line: &str) {
    println!("{line}");
    let _ = io::stdout().flush();
}

/// Print a progress update.
pub fn print_progress(lines: usize) {
    eprintln!("{} {} lines", "[PROGRESS]".cyan().bold(), lines);
}

/// Print a supervisor error, tagging the ones that stopped the run.
pub fn print_run_error(error: &SupervisorError) {
    let tag = if error.is_fatal() { "[FATAL]" } else { "[ERROR]" };
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        tag.red().bold(),
        truncate(&error.to_string(), MAX_REASON_LEN).red()
    );
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}

/// Print the detected rsync flavour.
pub fn print_variant(variant: Option<RsyncVariant>, version: Option<&str>) {
    match variant {
        Some(variant) => println!(
            "{} {} {}",
            "[VERSION]".blue().bold(),
            variant.to_string().cyan(),
            version.unwrap_or("unknown").dimmed()
        ),
        None => println!(
            "{} {}",
            "[VERSION]".yellow().bold(),
            "unrecognised rsync version output".yellow()
        ),
    }
    let _ = io::stdout().flush();
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_secs(report: &RunReport) -> f64 {
    report.elapsed().num_milliseconds() as f64 / 1000.0
}

/// Print the end-of-run summary.
pub fn print_report(report: &RunReport) {
    let ts = timestamp();
    let status = match (report.exit_code, report.signal) {
        (Some(code), _) => format!("exit={code}"),
        (None, Some(signal)) => format!("signal={signal}"),
        (None, None) => "exit=unknown".to_string(),
    };
    let detail = format!(
        "lines={} evicted={} elapsed={:.2}s id={}",
        report.lines_seen,
        report.evicted,
        elapsed_secs(report),
        report.correlation_id
    );
    if report.success() {
        println!(
            "{} {} Run completed {} {}",
            ts.dimmed(),
            "[DONE]".green().bold(),
            status,
            detail.dimmed()
        );
    } else {
        println!(
            "{} {} Run failed {} {}",
            ts.dimmed(),
            "[DONE]".red().bold(),
            status,
            detail.dimmed()
        );
    }
    let _ = io::stdout().flush();
}

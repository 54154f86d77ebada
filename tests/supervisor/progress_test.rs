//! Integration tests for progress reporting in each line mode.

use std::sync::Arc;

use rsync_supervisor::classify::RsyncVariant;
use rsync_supervisor::supervisor::Supervisor;

use super::{fake_rsync, launch_script, run_to_end, sh_args, RecordingSink};

/// File list, then the statistics block, with pauses so each part arrives
/// while the process is still running.
const TRANSFER_SCRIPT: &str = "printf 'sending incremental file list\\nfile.txt\\n'; sleep 0.3; \
    printf 'Number of files: 1 (reg: 1)\\nTotal file size: 10 bytes\\n'; sleep 0.3; \
    printf 'sent 120 bytes  received 35 bytes\\n'; sleep 0.3";

#[tokio::test]
async fn rsync3_progress_stops_at_summary() {
    let sink = RecordingSink::shell();
    let supervisor = Supervisor::new(sh_args(TRANSFER_SCRIPT, &[]), sink.clone())
        .report_progress(true)
        .variant(RsyncVariant::Rsync3);

    let report = run_to_end(supervisor).await;

    let progress = sink.progress();
    assert!(!progress.is_empty(), "expected progress before the summary");
    assert!(progress.iter().all(|&count| count <= 2), "{progress:?}");
    assert_eq!(progress.last(), Some(&2));
    assert!(report.summary_started);
    assert_eq!(report.output.len(), 5);
}

#[tokio::test]
async fn rsync3_dry_run_reports_through_summary() {
    let sink = RecordingSink::shell();
    let supervisor = Supervisor::new(sh_args(TRANSFER_SCRIPT, &["--dry-run"]), sink.clone())
        .report_progress(true)
        .variant(RsyncVariant::Rsync3);

    let report = run_to_end(supervisor).await;

    let progress = sink.progress();
    assert_eq!(progress.last(), Some(&5), "{progress:?}");
    assert!(progress.iter().any(|&count| count > 2));
    assert!(!report.summary_started);
    assert_eq!(report.output.len(), 5);
}

#[tokio::test]
async fn openrsync_reports_progress_throughout() {
    let sink = RecordingSink::shell();
    let supervisor = Supervisor::new(sh_args(TRANSFER_SCRIPT, &[]), sink.clone())
        .report_progress(true)
        .variant(RsyncVariant::OpenRsync);

    let report = run_to_end(supervisor).await;

    let progress = sink.progress();
    assert_eq!(progress.last(), Some(&5), "{progress:?}");
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(!report.summary_started);
}

#[tokio::test]
async fn progress_disabled_reports_nothing() {
    let sink = RecordingSink::shell();
    let supervisor = Supervisor::new(sh_args(TRANSFER_SCRIPT, &[]), sink.clone())
        .variant(RsyncVariant::OpenRsync);

    run_to_end(supervisor).await;

    assert!(sink.progress().is_empty());
}

#[tokio::test]
async fn progress_precedes_completion() {
    let sink = RecordingSink::shell();
    let supervisor = Supervisor::new(sh_args(TRANSFER_SCRIPT, &[]), sink.clone())
        .report_progress(true)
        .variant(RsyncVariant::OpenRsync);

    run_to_end(supervisor).await;

    let events = sink.events();
    let completion = events
        .iter()
        .position(|event| matches!(event, super::Event::Completion(..)))
        .unwrap();
    assert!(events[completion..]
        .iter()
        .all(|event| !matches!(event, super::Event::Progress(_))));
}

#[tokio::test]
async fn version_probe_records_lines_only() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_rsync(
        dir.path(),
        "echo 'rsync  version 3.2.7  protocol version 31'; echo 'rsync error: not really'",
    );
    let sink = Arc::new(RecordingSink::new(Some(script)));

    let report = launch_script(|| {
        Supervisor::new(["--version"], sink.clone())
            .report_progress(true)
            .correlation_id("probe")
    })
    .await;

    assert!(sink.progress().is_empty());
    assert!(sink.errors().is_empty());
    assert!(!report.error_discovered);
    assert_eq!(report.output.len(), 2);
    assert_eq!(
        RsyncVariant::detect(&report.output.join("\n")),
        Some(RsyncVariant::Rsync3)
    );
    assert_eq!(sink.completions().len(), 1);
}

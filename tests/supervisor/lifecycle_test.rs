//! Integration tests for stopping a running process through its handle.

use std::time::Duration;

use rsync_supervisor::config::SupervisorConfig;
use rsync_supervisor::supervisor::{RunState, Supervisor};

use super::{sh_args, RecordingSink};

const SIGKILL: i32 = 9;

#[tokio::test]
async fn terminate_lets_the_process_exit_cleanly() {
    let sink = RecordingSink::shell();
    let script = "trap 'echo stopping; exit 7' TERM; echo ready; while true; do sleep 0.1; done";
    let handle = Supervisor::new(sh_args(script, &[]), sink.clone())
        .launch()
        .unwrap();

    sink.wait_for_line("ready").await;
    assert_eq!(handle.state(), RunState::Running);
    handle.process().terminate();

    let report = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("process did not stop")
        .unwrap();
    assert_eq!(report.exit_code, Some(7));
    assert!(report.output.contains(&"stopping".to_string()));
    assert_eq!(sink.completions().len(), 1);
}

#[tokio::test]
async fn terminate_escalates_to_kill_after_grace() {
    let sink = RecordingSink::shell();
    let config = SupervisorConfig {
        terminate_grace_ms: 200,
        ..SupervisorConfig::default()
    };
    let script = "trap '' TERM; echo ready; while true; do sleep 0.1; done";
    let handle = Supervisor::new(sh_args(script, &[]), sink.clone())
        .config(config)
        .launch()
        .unwrap();

    sink.wait_for_line("ready").await;
    handle.process().terminate();

    let report = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("process was not killed")
        .unwrap();
    assert_eq!(report.signal, Some(SIGKILL));
    assert_eq!(report.exit_code, None);
}

#[tokio::test]
async fn kill_stops_the_process_immediately() {
    let sink = RecordingSink::shell();
    let handle = Supervisor::new(sh_args("echo ready; sleep 30", &[]), sink.clone())
        .launch()
        .unwrap();

    sink.wait_for_line("ready").await;
    let process = handle.process().clone();
    process.kill();

    let report = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("process was not killed")
        .unwrap();
    assert_eq!(report.signal, Some(SIGKILL));
    assert!(process.is_finished());
    assert_eq!(report.output, vec!["ready"]);

    process.kill();
    process.terminate();
}

#[tokio::test]
async fn exited_resolves_when_the_process_ends() {
    let sink = RecordingSink::shell();
    let handle = Supervisor::new(sh_args("echo done", &[]), sink)
        .launch()
        .unwrap();
    let process = handle.process().clone();

    tokio::time::timeout(Duration::from_secs(10), process.exited())
        .await
        .expect("exit was never signalled");
    assert!(process.pid().is_some());

    let report = handle.wait().await.unwrap();
    assert_eq!(report.output, vec!["done"]);
}

#[tokio::test]
async fn state_changes_are_observable() {
    let sink = RecordingSink::shell();
    let handle = Supervisor::new(sh_args("echo ready; sleep 0.2", &[]), sink.clone())
        .launch()
        .unwrap();
    let mut states = handle.state_receiver();

    sink.wait_for_line("ready").await;
    let waiter = tokio::spawn(async move {
        let mut seen = vec![*states.borrow_and_update()];
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state.is_final() {
                break;
            }
        }
        seen
    });

    handle.wait().await.unwrap();
    let seen = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.first(), Some(&RunState::Running));
    assert_eq!(seen.last(), Some(&RunState::Terminated));
}

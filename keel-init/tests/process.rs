//! Host-process runner tests driving real /bin/sh workloads.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{MockEventSink, fast_opts, shell_args, wait_until};
use keel_init::error::RunnerError;
use keel_init::system::events::Recorder;
use keel_init::system::runner::process::ProcessRunner;
use keel_init::system::runner::restart::RestartRunner;
use keel_init::system::runner::{Options, RestartType, Runner};

fn sink() -> Arc<dyn Recorder> {
    Arc::new(MockEventSink)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

async fn log_contents(dir: &tempfile::TempDir, id: &str) -> Vec<u8> {
    tokio::fs::read(dir.path().join(format!("{id}.log")))
        .await
        .unwrap_or_default()
}

#[tokio::test]
async fn run_success() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ProcessRunner::new(
        false,
        shell_args("exit0", "exit 0"),
        Options::default().with_log_path(dir.path()),
    );

    runner.open().await.unwrap();
    runner.run(sink()).await.unwrap();
    // calling stop when run has finished is a no-op
    runner.stop().await.unwrap();
    runner.close().await.unwrap();
}

#[tokio::test]
async fn run_reports_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ProcessRunner::new(
        false,
        shell_args("exit1", "exit 1"),
        Options::default().with_log_path(dir.path()),
    );

    runner.open().await.unwrap();
    let err = runner.run(sink()).await.unwrap_err();
    match err {
        RunnerError::ProcessExit { id, code } => {
            assert_eq!(id, "exit1");
            assert_eq!(code, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    runner.close().await.unwrap();
}

#[tokio::test]
async fn run_captures_logs_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ProcessRunner::new(
        false,
        shell_args("logtest", r"printf 'Test 1\nTest 2\n'"),
        Options::default().with_log_path(dir.path()),
    );

    runner.open().await.unwrap();
    runner.run(sink()).await.unwrap();
    runner.close().await.unwrap();

    assert_eq!(log_contents(&dir, "logtest").await, b"Test 1\nTest 2\n");
}

#[tokio::test]
async fn failing_workload_restarts_until_marker_appears() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let script = format!("test -f {} && echo ok || (echo fail; false)", marker.display());

    let process = Arc::new(ProcessRunner::new(
        false,
        shell_args("endless", &script),
        fast_opts(dir.path()),
    ));
    let runner = Arc::new(
        RestartRunner::new(process)
            .with_type(RestartType::Forever)
            .with_restart_interval(Duration::from_millis(5)),
    );

    runner.open().await.unwrap();
    let handle = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run(sink()).await }
    });

    let saw_fail = wait_until(Duration::from_secs(5), || {
        std::fs::read(dir.path().join("endless.log"))
            .map(|log| contains(&log, b"fail\n"))
            .unwrap_or(false)
    })
    .await;
    assert!(saw_fail, "log should contain failures before the marker exists");
    assert!(!handle.is_finished(), "workload should still be restarting");

    tokio::fs::write(&marker, b"").await.unwrap();

    let saw_ok = wait_until(Duration::from_secs(5), || {
        std::fs::read(dir.path().join("endless.log"))
            .map(|log| contains(&log, b"ok\n"))
            .unwrap_or(false)
    })
    .await;
    assert!(saw_ok, "log should contain successes after the marker exists");
    assert!(!handle.is_finished(), "Forever keeps restarting after success");

    runner.stop().await.unwrap();
    // the last attempt may have been interrupted mid-run; only the stop
    // itself must be clean
    let _ = handle.await.unwrap();
    runner.close().await.unwrap();

    let log = log_contents(&dir, "endless").await;
    assert!(contains(&log, b"fail\n"));
    assert!(contains(&log, b"ok\n"));
}

#[tokio::test]
async fn stop_escalates_to_sigkill() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ProcessRunner::new(
        false,
        shell_args("nokill", "trap '' TERM; while :; do :; done"),
        Options::default()
            .with_log_path(dir.path())
            .with_graceful_shutdown_timeout(Duration::from_millis(10)),
    ));

    runner.open().await.unwrap();
    let handle = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run(sink()).await }
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!handle.is_finished(), "workload should be ignoring SIGTERM");

    let started = Instant::now();
    runner.stop().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "stop should escalate to SIGKILL promptly"
    );

    // SIGKILL surfaces as a non-zero exit
    let result = handle.await.unwrap();
    assert!(result.is_err());
    runner.close().await.unwrap();
}

//! Lifecycle tests for the per-service state machine.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{MockCondition, MockRunner, MockService, states, test_user_data, wait_until};
use keel_init::ServiceRunner;
use keel_init::error::RunnerError;
use keel_init::system::events::ServiceState;

fn runner_for(service: MockService, dir: &tempfile::TempDir) -> Arc<ServiceRunner> {
    Arc::new(ServiceRunner::new(
        Arc::new(service),
        test_user_data(dir.path()),
    ))
}

#[tokio::test]
async fn full_flow() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, _exit) = MockRunner::new();
    let sr = runner_for(MockService::new("mock", mock), &dir);

    let handle = tokio::spawn(sr.clone().start());

    assert!(
        wait_until(Duration::from_secs(5), || sr.state() == ServiceState::Running).await,
        "service should reach Running"
    );
    assert!(!handle.is_finished(), "service should still be running");

    sr.shutdown();
    handle.await.unwrap();

    assert_eq!(
        states(&sr),
        vec![
            ServiceState::Preparing,
            ServiceState::Waiting,
            ServiceState::Preparing,
            ServiceState::Running,
            ServiceState::Finished,
        ]
    );

    let info = sr.as_proto();
    assert_eq!(info.id, "mock");
    assert_eq!(info.state, "Finished");
    assert!(info.health.unwrap().unknown);
    assert_eq!(info.events.len(), 5);
}

#[tokio::test]
async fn state_always_matches_last_event() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, _exit) = MockRunner::new();
    let sr = runner_for(MockService::new("mock", mock), &dir);

    let handle = tokio::spawn(sr.clone().start());
    assert!(wait_until(Duration::from_secs(5), || sr.state() == ServiceState::Running).await);

    let history = sr.get_event_history(1000);
    assert_eq!(sr.state(), history.last().unwrap().state);

    sr.shutdown();
    handle.await.unwrap();

    let history = sr.get_event_history(1000);
    assert_eq!(sr.state(), history.last().unwrap().state);
}

#[tokio::test]
async fn pre_failure_skips_post() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, _exit) = MockRunner::new();
    let mut service = MockService::new("mock", mock);
    service.pre_fail = true;
    let service = Arc::new(service);

    let sr = Arc::new(ServiceRunner::new(service.clone(), test_user_data(dir.path())));
    sr.clone().start().await;

    assert_eq!(
        states(&sr),
        vec![ServiceState::Preparing, ServiceState::Failed]
    );
    let last = sr.get_event_history(1).pop().unwrap();
    assert_eq!(last.message, "Failed to run pre stage: pre failed");
    assert_eq!(service.post_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn runner_construction_failure_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, _exit) = MockRunner::new();
    let mut service = MockService::new("mock", mock);
    service.condition = MockCondition::None;
    service.runner_fail = true;

    let sr = runner_for(service, &dir);
    sr.clone().start().await;

    assert_eq!(
        states(&sr),
        vec![
            ServiceState::Preparing,
            ServiceState::Preparing,
            ServiceState::Failed,
        ]
    );
    let last = sr.get_event_history(1).pop().unwrap();
    assert_eq!(last.message, "Failed to create runner: runner failed");
}

#[tokio::test]
async fn missing_runner_skips_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let sr = runner_for(MockService::without_runner("mock"), &dir);
    sr.clone().start().await;

    assert_eq!(
        states(&sr),
        vec![
            ServiceState::Preparing,
            ServiceState::Preparing,
            ServiceState::Skipped,
        ]
    );
    assert_eq!(sr.state(), ServiceState::Skipped);
}

#[tokio::test]
async fn cancelled_condition_surfaces_the_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, _exit) = MockRunner::new();
    let mut service = MockService::new("mock", mock);
    service.condition = MockCondition::NeverSatisfied;

    let sr = runner_for(service, &dir);
    let handle = tokio::spawn(sr.clone().start());

    assert!(wait_until(Duration::from_secs(5), || sr.state() == ServiceState::Waiting).await);
    sr.shutdown();
    handle.await.unwrap();

    assert_eq!(
        states(&sr),
        vec![
            ServiceState::Preparing,
            ServiceState::Waiting,
            ServiceState::Failed,
        ]
    );
    let last = sr.get_event_history(1).pop().unwrap();
    assert_eq!(last.message, "Condition failed: operation canceled");
}

#[tokio::test]
async fn post_failure_overrides_finished() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, _exit) = MockRunner::new();
    let mut service = MockService::new("mock", mock);
    service.post_fail = true;

    let sr = runner_for(service, &dir);
    let handle = tokio::spawn(sr.clone().start());

    assert!(wait_until(Duration::from_secs(5), || sr.state() == ServiceState::Running).await);
    sr.shutdown();
    handle.await.unwrap();

    assert_eq!(
        states(&sr),
        vec![
            ServiceState::Preparing,
            ServiceState::Waiting,
            ServiceState::Preparing,
            ServiceState::Running,
            ServiceState::Finished,
            ServiceState::Failed,
        ]
    );
}

#[tokio::test]
async fn run_failure_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, exit) = MockRunner::new();
    let sr = runner_for(MockService::new("mock", mock.clone()), &dir);

    let handle = tokio::spawn(sr.clone().start());
    assert!(wait_until(Duration::from_secs(5), || sr.state() == ServiceState::Running).await);

    exit.send(Err(RunnerError::Entrypoint("run failed".to_string())))
        .unwrap();
    handle.await.unwrap();

    assert_eq!(
        states(&sr),
        vec![
            ServiceState::Preparing,
            ServiceState::Waiting,
            ServiceState::Preparing,
            ServiceState::Running,
            ServiceState::Failed,
        ]
    );

    // close follows a successful open even on the failure path
    assert_eq!(mock.opens.load(Ordering::SeqCst), 1);
    assert_eq!(mock.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restarting_appends_a_fresh_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, _exit) = MockRunner::new();
    let sr = runner_for(MockService::new("mock", mock), &dir);

    let handle = tokio::spawn(sr.clone().start());
    assert!(wait_until(Duration::from_secs(5), || sr.state() == ServiceState::Running).await);
    sr.shutdown();
    handle.await.unwrap();

    // the mock runner's stop latch stays set, so the second lifecycle
    // runs straight through to Finished
    sr.clone().start().await;

    assert_eq!(
        states(&sr),
        vec![
            ServiceState::Preparing,
            ServiceState::Waiting,
            ServiceState::Preparing,
            ServiceState::Running,
            ServiceState::Finished,
            ServiceState::Preparing,
            ServiceState::Waiting,
            ServiceState::Preparing,
            ServiceState::Running,
            ServiceState::Finished,
        ]
    );
}

#[tokio::test]
async fn event_history_stays_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, _exit) = MockRunner::with_chatter(40);
    let sr = runner_for(MockService::new("mock", mock), &dir);

    let handle = tokio::spawn(sr.clone().start());
    assert!(wait_until(Duration::from_secs(5), || sr.state() == ServiceState::Running).await);
    sr.shutdown();
    handle.await.unwrap();

    let history = sr.get_event_history(1000);
    assert!(history.len() <= 16, "history length {}", history.len());
    assert_eq!(sr.state(), history.last().unwrap().state);
}

//! Worker termination, restarts, timeouts and the circuit breaker.
#![cfg(unix)]

use std::time::Duration;

use serde_json::json;
use symgate::capability::Capability;
use symgate::worker::{
    LaunchSpec, RestartPolicy, SupervisorConfig, WorkerError, WorkerState, WorkerStatus,
};
use symgate::WorkerService;

/// Echoes requests, exits with code 3 on a `die` payload.
const FRAGILE_WORKER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *die*) exit 3 ;;
    *) printf '{"result":%s}\n' "$line" ;;
  esac
done
"#;

/// Echoes requests except `slow` ones, which it never answers.
const SLOW_WORKER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *slow*) ;;
    *) printf '{"result":%s}\n' "$line" ;;
  esac
done
"#;

/// Answers every request with its own process id.
const PID_WORKER: &str = r#"while IFS= read -r line; do printf '{"result":%s}\n' "$$"; done"#;

fn sh(script: &str) -> LaunchSpec {
    LaunchSpec::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

fn quick_restarts() -> RestartPolicy {
    RestartPolicy {
        base_delay: Duration::from_millis(50),
        ..RestartPolicy::default()
    }
}

fn config(launch: LaunchSpec) -> SupervisorConfig {
    let mut config = SupervisorConfig::new(Capability::Differentiate, launch);
    config.restart = quick_restarts();
    config
}

async fn wait_for_status(
    service: &WorkerService,
    predicate: impl FnMut(&WorkerStatus) -> bool,
) -> WorkerStatus {
    let mut status = service.watch_status();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), status.wait_for(predicate))
        .await
        .expect("timed out waiting for worker status")
        .expect("supervisor stopped")
        .clone();
    snapshot
}

#[tokio::test]
async fn test_crash_rejects_in_flight_and_worker_restarts() {
    let service = WorkerService::start(config(sh(FRAGILE_WORKER)));
    wait_for_status(&service, |s| s.state == WorkerState::Ready).await;

    let err = service
        .submit(&json!({ "expression": "die" }))
        .await
        .unwrap_err();
    match &err {
        WorkerError::WorkerUnavailable(message) => assert!(message.contains("exit code 3")),
        other => panic!("expected worker unavailable, got {:?}", other),
    }
    assert!(err.is_worker_exited());

    let status =
        wait_for_status(&service, |s| s.generation == 2 && s.state == WorkerState::Ready).await;
    assert_eq!(status.restarts, 1);
    assert_eq!(status.last_exit.as_deref(), Some("exit code 3"));

    let payload = json!({ "expression": "x^2" });
    assert_eq!(service.submit(&payload).await.unwrap(), payload);

    // A successful response clears the failure streak.
    assert_eq!(service.status().consecutive_failures, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_crash_rejects_queued_requests_too() {
    // Takes one request and dies without answering.
    let service = WorkerService::start(config(sh("IFS= read -r line; exit 1")));

    let first = json!({ "expression": "a" });
    let second = json!({ "expression": "b" });
    let (a, b) = tokio::join!(service.submit(&first), service.submit(&second));

    assert!(matches!(a, Err(WorkerError::WorkerUnavailable(_))));
    assert!(matches!(b, Err(WorkerError::WorkerUnavailable(_))));

    service.shutdown().await;
}

#[tokio::test]
async fn test_submissions_during_restart_are_served_by_next_worker() {
    let mut config = config(sh(FRAGILE_WORKER));
    config.restart.base_delay = Duration::from_millis(300);
    let service = WorkerService::start(config);
    wait_for_status(&service, |s| s.state == WorkerState::Ready).await;

    let _ = service.submit(&json!({ "expression": "die" })).await;
    wait_for_status(&service, |s| s.state == WorkerState::Restarting).await;

    let payload = json!({ "expression": "queued while restarting" });
    assert_eq!(service.submit(&payload).await.unwrap(), payload);
    assert_eq!(service.status().generation, 2);

    service.shutdown().await;
}

#[tokio::test]
async fn test_request_timeout_rejects_and_recycles_worker() {
    let mut config = config(sh(SLOW_WORKER));
    config.request_timeout = Some(Duration::from_millis(200));
    let service = WorkerService::start(config);

    let slow = service.submit(&json!({ "expression": "slow" })).await;
    assert!(matches!(slow, Err(WorkerError::Timeout(200))));

    let payload = json!({ "expression": "fast" });
    assert_eq!(service.submit(&payload).await.unwrap(), payload);
    assert!(service.status().generation >= 2);

    service.shutdown().await;
}

#[tokio::test]
async fn test_submission_right_after_timeout_reaches_next_worker() {
    let mut config = config(sh(SLOW_WORKER));
    config.request_timeout = Some(Duration::from_millis(100));
    let service = WorkerService::start(config);

    for round in 0..5 {
        let slow = service.submit(&json!({ "expression": "slow" })).await;
        assert!(
            matches!(slow, Err(WorkerError::Timeout(100))),
            "round {}: {:?}",
            round,
            slow
        );

        let payload = json!({ "expression": format!("fast {}", round) });
        assert_eq!(service.submit(&payload).await.unwrap(), payload);
    }

    let status = service.status();
    assert_eq!(status.generation, 6);
    assert_eq!(status.consecutive_failures, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_timeout_rejects_requests_queued_behind_it() {
    let mut config = config(sh(SLOW_WORKER));
    config.request_timeout = Some(Duration::from_millis(100));
    let service = WorkerService::start(config);

    let slow = json!({ "expression": "slow" });
    let queued = json!({ "expression": "queued" });
    let (first, second) = tokio::join!(service.submit(&slow), service.submit(&queued));

    assert!(matches!(first, Err(WorkerError::Timeout(100))));
    match second {
        Err(WorkerError::WorkerUnavailable(message)) => {
            assert!(message.contains("request timeout"), "{}", message)
        }
        other => panic!("expected worker unavailable, got {:?}", other),
    }

    service.shutdown().await;
}

#[tokio::test]
async fn test_killed_worker_restarts_once_after_delay() {
    let delay = Duration::from_millis(300);
    let mut config = config(sh(PID_WORKER));
    config.restart.base_delay = delay;
    let service = WorkerService::start(config);

    let first = wait_for_status(&service, |s| s.state == WorkerState::Ready).await;
    let old_pid = first.pid.expect("worker has a pid");
    assert_eq!(
        service.submit(&json!({ "expression": "x" })).await.unwrap(),
        json!(old_pid)
    );

    let killed_at = tokio::time::Instant::now();
    let killed = std::process::Command::new("kill")
        .args(["-9", &old_pid.to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let restarted =
        wait_for_status(&service, |s| s.generation == 2 && s.state == WorkerState::Ready).await;
    assert!(killed_at.elapsed() >= delay);
    assert_eq!(restarted.restarts, 1);
    assert!(restarted
        .last_exit
        .as_deref()
        .unwrap_or_default()
        .contains("signal"));
    let new_pid = restarted.pid.expect("restarted worker has a pid");
    assert_ne!(new_pid, old_pid);

    // One launch per termination, nothing more.
    tokio::time::sleep(delay * 2).await;
    let settled = service.status();
    assert_eq!(settled.generation, 2);
    assert_eq!(settled.restarts, 1);
    assert_eq!(settled.state, WorkerState::Ready);

    assert_eq!(
        service.submit(&json!({ "expression": "y" })).await.unwrap(),
        json!(new_pid)
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_circuit_opens_after_max_restarts() {
    let mut config = config(LaunchSpec::new("/definitely/not/a/worker", vec![]));
    config.restart = RestartPolicy {
        base_delay: Duration::from_millis(10),
        max_restarts: Some(2),
        ..RestartPolicy::default()
    };
    let service = WorkerService::start(config);

    let status = wait_for_status(&service, |s| s.state == WorkerState::CircuitOpen).await;
    assert_eq!(status.generation, 3);
    assert_eq!(status.restarts, 2);
    assert_eq!(status.consecutive_failures, 3);

    let result = service.submit(&json!({ "expression": "x" })).await;
    assert!(matches!(result, Err(WorkerError::CircuitOpen)));

    service.shutdown().await;
    assert_eq!(service.status().state, WorkerState::Stopped);
}

#[tokio::test]
async fn test_worker_exiting_immediately_trips_breaker() {
    let mut config = config(sh("exit 0"));
    config.restart.max_restarts = Some(1);
    let service = WorkerService::start(config);

    let status = wait_for_status(&service, |s| s.state == WorkerState::CircuitOpen).await;
    assert_eq!(status.last_exit.as_deref(), Some("exit code 0"));

    service.shutdown().await;
}

#[tokio::test]
async fn test_backoff_spaces_out_restarts() {
    let mut config = config(sh("exit 1"));
    config.restart = RestartPolicy {
        base_delay: Duration::from_millis(100),
        multiplier: 2.0,
        max_delay: Duration::from_secs(5),
        max_restarts: Some(3),
    };
    let service = WorkerService::start(config);

    // 100 + 200 + 400 ms of restart delay before the breaker opens.
    let started = tokio::time::Instant::now();
    wait_for_status(&service, |s| s.state == WorkerState::CircuitOpen).await;
    assert!(started.elapsed() >= Duration::from_millis(700));

    service.shutdown().await;
}

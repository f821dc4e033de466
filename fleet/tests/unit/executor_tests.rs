//! Bounded executor: retry bound, deadlines, and error propagation.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use remote_fleet::application::services::executor::run_bounded;
use remote_fleet::domain::command::ExecPolicy;
use remote_fleet::domain::error::ExecError;

use crate::helpers::fast_policy;
use crate::mocks::{FakeSession, HostState};

fn session(state: HostState) -> (FakeSession, Arc<Mutex<HostState>>) {
    let shared = Arc::new(Mutex::new(state));
    (FakeSession::new(Arc::clone(&shared)), shared)
}

#[tokio::test]
async fn test_hanging_command_is_attempted_exactly_n_times() {
    let mut state = HostState::new("/h");
    state.hang_on = Some("sleep".to_string());
    let (session, shared) = session(state);

    let err = run_bounded(&session, "h0", "sleep 1000", &fast_policy(3))
        .await
        .unwrap_err();

    assert_eq!(shared.lock().unwrap().commands_matching("sleep").len(), 3);
    let Some(ExecError::Timeout {
        command,
        host,
        attempts,
        stdout,
        ..
    }) = err.downcast_ref::<ExecError>()
    else {
        panic!("expected a timeout, got: {err}");
    };
    assert_eq!(command, "sleep 1000");
    assert_eq!(host, "h0");
    assert_eq!(*attempts, 3);
    assert_eq!(stdout, "partial");
}

#[tokio::test]
async fn test_zero_retries_makes_one_attempt() {
    let mut state = HostState::new("/h");
    state.hang_on = Some("sleep".to_string());
    let (session, shared) = session(state);

    let err = run_bounded(&session, "h0", "sleep 1", &fast_policy(0))
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ExecError>(),
        Some(ExecError::Timeout { attempts: 1, .. })
    ));
    assert_eq!(shared.lock().unwrap().commands.len(), 1);
}

#[tokio::test]
async fn test_finished_command_returns_first_result() {
    let (session, shared) = session(HostState::new("/users/me"));

    let result = run_bounded(&session, "h0", "echo $HOME", &fast_policy(5))
        .await
        .expect("finishes");

    assert_eq!(result.stdout, "/users/me\n");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, 0);
    assert_eq!(shared.lock().unwrap().commands.len(), 1);
}

#[tokio::test]
async fn test_non_zero_exit_is_not_retried() {
    let (session, shared) = session(HostState::new("/h"));

    let result = run_bounded(&session, "h0", "cat /missing", &fast_policy(5))
        .await
        .expect("finishes");

    assert_eq!(result.exit_code, 1);
    assert!(result.stderr.contains("No such file"));
    assert_eq!(shared.lock().unwrap().commands.len(), 1);
}

#[tokio::test]
async fn test_transport_error_propagates_without_retry() {
    let mut state = HostState::new("/h");
    state.broken_on = Some("lsblk".to_string());
    let (session, shared) = session(state);

    let err = run_bounded(&session, "h0", "lsblk -b --json", &fast_policy(5))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("channel broken"), "got: {err}");
    assert!(err.downcast_ref::<ExecError>().is_none());
    assert_eq!(shared.lock().unwrap().commands.len(), 1);
}

#[tokio::test]
async fn test_no_timeout_waits_for_completion() {
    let (session, _) = session(HostState::new("/h"));

    let result = run_bounded(&session, "h0", "true", &ExecPolicy::default())
        .await
        .expect("finishes");

    assert!(result.success());
}

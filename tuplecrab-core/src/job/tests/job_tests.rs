use super::*;
use std::sync::Arc;
use std::thread;

use anyhow::anyhow;

// --- State tests ---

#[test]
fn test_successors() {
    assert!(State::Constructed.can_move_to(State::Initialized));
    assert!(State::Constructed.can_move_to(State::Closed));
    assert!(!State::Constructed.can_move_to(State::Running));
    assert!(State::Initialized.can_move_to(State::Running));
    assert!(State::Running.can_move_to(State::Paused));
    assert!(State::Paused.can_move_to(State::Running));
    assert!(!State::Running.can_move_to(State::Initialized));
    assert_eq!(State::Closed.successors(), &[State::Closed]);
}

#[test]
fn test_action_targets() {
    assert_eq!(Action::Initialize.target(), State::Initialized);
    assert_eq!(Action::Start.target(), State::Running);
    assert_eq!(Action::Resume.target(), State::Running);
    assert_eq!(Action::Pause.target(), State::Paused);
    assert_eq!(Action::Close.target(), State::Closed);
}

#[test]
fn test_display_and_serde_names() {
    assert_eq!(State::Constructed.to_string(), "CONSTRUCTED");
    assert_eq!(Action::Initialize.to_string(), "INITIALIZE");
    assert_eq!(serde_json::to_string(&State::Running).unwrap(), "\"RUNNING\"");
    assert_eq!(serde_json::to_string(&Health::Unhealthy).unwrap(), "\"UNHEALTHY\"");
    assert_eq!(
        serde_json::from_str::<Action>("\"CLOSE\"").unwrap(),
        Action::Close
    );
}

// --- JobState tests ---

#[test]
fn test_new_job_is_constructed_and_healthy() {
    let state = JobState::new();
    let status = state.snapshot();
    assert_eq!(status.current, State::Constructed);
    assert_eq!(status.next, State::Constructed);
    assert_eq!(status.health, Health::Healthy);
    assert_eq!(status.last_error, None);
    assert!(!state.in_transition());
}

#[test]
fn test_request_then_complete() {
    let state = JobState::new();
    assert_eq!(state.request(Action::Initialize).unwrap(), State::Constructed);
    assert!(state.in_transition());
    assert_eq!(state.current(), State::Constructed);
    assert_eq!(state.next(), State::Initialized);

    assert_eq!(state.complete_transition(), State::Initialized);
    assert!(!state.in_transition());
}

#[test]
fn test_request_while_in_transition_fails() {
    let state = JobState::new();
    state.request(Action::Initialize).unwrap();
    let err = state.request(Action::Close).unwrap_err();
    assert!(matches!(
        err,
        JobError::InTransition {
            action: Action::Close,
            current: State::Constructed,
            next: State::Initialized,
        }
    ));
    assert_eq!(
        err.to_string(),
        "cannot CLOSE: job is moving from CONSTRUCTED to INITIALIZED"
    );
}

#[test]
fn test_unreachable_request_fails() {
    let state = JobState::new();
    let err = state.request(Action::Start).unwrap_err();
    assert!(matches!(
        err,
        JobError::Unreachable {
            target: State::Running,
            ..
        }
    ));
    assert!(!state.in_transition());
}

#[test]
fn test_close_of_closed_job_is_accepted() {
    let state = JobState::new();
    state.request(Action::Close).unwrap();
    state.complete_transition();

    assert_eq!(state.request(Action::Close).unwrap(), State::Closed);
    assert!(!state.in_transition());
    assert!(state.request(Action::Initialize).is_err());
}

#[test]
fn test_report_failure() {
    let state = JobState::new();
    state.report_failure(&anyhow!("disk full").context("writing batch"));
    let status = state.snapshot();
    assert_eq!(status.health, Health::Unhealthy);
    assert_eq!(status.last_error.as_deref(), Some("writing batch: disk full"));
    // Failure does not move the job.
    assert_eq!(status.current, State::Constructed);
}

#[test]
fn test_wait_for_is_woken_by_transition() {
    let state = Arc::new(JobState::new());
    let waiter = {
        let state = Arc::clone(&state);
        thread::spawn(move || state.wait_for(State::Initialized, Duration::from_secs(5)))
    };
    state.request(Action::Initialize).unwrap();
    state.complete_transition();
    assert!(waiter.join().unwrap());
}

#[test]
fn test_wait_for_times_out() {
    let state = JobState::new();
    let started = Instant::now();
    assert!(!state.wait_for(State::Running, Duration::from_millis(50)));
    assert!(started.elapsed() >= Duration::from_millis(50));

    let (status, held) = state.wait_until(Duration::ZERO, |s| s.health == Health::Healthy);
    assert!(held);
    assert_eq!(status.current, State::Constructed);
}

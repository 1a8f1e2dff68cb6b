//! Integration tests for emergency teardown.

use std::time::Duration;

use afk_guard_core::LockState;

mod common;
use common::{fixture, select_and_activate, wait_until};

#[test]
fn force_exit_tests_tears_the_whole_session_down() {
    let mut fx = fixture(vec![]);
    select_and_activate(&mut fx);
    assert!(wait_until(Duration::from_secs(1), || {
        fx.coordinator.latest_frame().is_some()
    }));

    fx.coordinator.force_exit();

    assert_eq!(fx.coordinator.state(), LockState::Idle);
    assert!(!fx.input.is_installed());
    assert!(!fx.capture.stream_active());
    assert!(fx.coordinator.latest_frame().is_none());
    assert!(fx.coordinator.session_started_at().is_none());
}

#[test]
fn force_exit_tests_is_a_noop_when_idle() {
    let mut fx = fixture(vec![]);
    fx.coordinator.force_exit();
    assert_eq!(fx.coordinator.state(), LockState::Idle);
    assert!(fx.coordinator.lock_error().is_none());
}

#[test]
fn force_exit_tests_drop_releases_interception() {
    let mut fx = fixture(vec![]);
    select_and_activate(&mut fx);
    assert!(fx.input.is_installed());

    let input = fx.input;
    drop(fx.coordinator);
    assert!(!input.is_installed());
}

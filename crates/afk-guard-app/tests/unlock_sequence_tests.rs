//! Integration tests for the re-authentication sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use afk_guard_app::LockCoordinator;
use afk_guard_auth::{AuthChallenge, AuthVerdict};
use afk_guard_capture::engine::EngineConfig;
use afk_guard_capture::{CaptureScript, SyntheticCaptureProvider};
use afk_guard_core::{LockError, LockState, MetricsSnapshot};
use afk_guard_input::{
    EventDisposition, InputEvent, InterceptorProbe, Key, Modifiers, SyntheticInterceptor,
};
use afk_guard_metrics::{SamplerConfig, SyntheticMetricsSource};

mod common;
use common::{TARGET_WINDOW, fixture, select_and_activate, wait_until};

#[test]
fn unlock_sequence_tests_denied_challenge_relocks() {
    let mut fx = fixture(vec![AuthVerdict::Denied, AuthVerdict::Granted]);
    select_and_activate(&mut fx);

    assert!(!fx.coordinator.request_unlock());
    assert_eq!(fx.coordinator.state(), LockState::Locked);
    assert_eq!(
        fx.coordinator.lock_error(),
        Some(LockError::AuthenticationFailed)
    );
    assert!(fx.input.is_installed());

    assert!(fx.coordinator.request_unlock());
    assert_eq!(fx.coordinator.state(), LockState::Idle);
    assert!(!fx.input.is_installed());
    assert_eq!(fx.auth.presented(), 2);
}

#[test]
fn unlock_sequence_tests_quit_chord_posts_unlock_signal() {
    let mut fx = fixture(vec![AuthVerdict::Granted]);
    select_and_activate(&mut fx);

    let disposition = fx.input.feed(&InputEvent::KeyDown {
        key: Key::Q,
        modifiers: Modifiers::COMMAND,
    });
    assert_eq!(disposition, EventDisposition::Swallow);
    assert!(fx.coordinator.try_recv_unlock_request());
    // The signal queue drains; servicing it unlocks.
    assert!(!fx.coordinator.try_recv_unlock_request());
    assert!(fx.coordinator.request_unlock());
    assert_eq!(fx.coordinator.state(), LockState::Idle);
}

#[test]
fn unlock_sequence_tests_session_end_clears_observables() {
    let mut fx = fixture(vec![AuthVerdict::Granted]);
    select_and_activate(&mut fx);

    assert!(wait_until(Duration::from_secs(1), || {
        fx.coordinator.latest_frame().is_some()
    }));
    assert!(fx.coordinator.request_unlock());

    assert!(fx.coordinator.latest_frame().is_none());
    assert_eq!(fx.coordinator.latest_metrics(), MetricsSnapshot::empty());
    assert!(fx.coordinator.session_started_at().is_none());
    assert!(!fx.capture.stream_active());
}

/// Challenge that records whether input blocking was lifted at the moment it
/// was presented.
struct SuspensionWitness {
    probe: Arc<InterceptorProbe>,
    saw_suspended: AtomicBool,
}

impl AuthChallenge for SuspensionWitness {
    fn challenge(&self) -> AuthVerdict {
        self.saw_suspended
            .store(!self.probe.is_installed(), Ordering::SeqCst);
        AuthVerdict::Granted
    }
}

#[test]
fn unlock_sequence_tests_blocking_is_suspended_during_the_challenge() {
    let capture = CaptureScript::with_windows(vec![CaptureScript::window(
        TARGET_WINDOW,
        "Editor",
        640.0,
        480.0,
    )]);
    let probe = InterceptorProbe::new(true);
    let witness = Arc::new(SuspensionWitness {
        probe: Arc::clone(&probe),
        saw_suspended: AtomicBool::new(false),
    });

    let mut coordinator = LockCoordinator::with_configs(
        Arc::new(SyntheticCaptureProvider::new(Arc::clone(&capture))),
        Box::new(SyntheticInterceptor::new(Arc::clone(&probe))),
        Arc::clone(&witness) as Arc<dyn AuthChallenge>,
        Box::new(|| Box::new(SyntheticMetricsSource::new())),
        EngineConfig {
            poll_interval: Duration::from_millis(10),
            watchdog_timeout: Duration::from_millis(60),
            stream_fps: 50,
        },
        SamplerConfig {
            interval: Duration::from_millis(10),
        },
    );

    let windows = coordinator.available_windows().expect("enumeration");
    coordinator.select_window(windows[0].clone());
    coordinator.activate().expect("activation");
    assert!(probe.is_installed());

    assert!(coordinator.request_unlock());
    assert!(witness.saw_suspended.load(Ordering::SeqCst));
    assert!(!probe.is_installed());
}

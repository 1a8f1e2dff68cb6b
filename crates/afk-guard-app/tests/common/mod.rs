//! Shared fixtures for lock session integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use afk_guard_app::LockCoordinator;
use afk_guard_auth::{AuthChallenge, AuthVerdict, ScriptedChallenge};
use afk_guard_capture::engine::EngineConfig;
use afk_guard_capture::{CaptureScript, SyntheticCaptureProvider};
use afk_guard_input::{InterceptorProbe, SyntheticInterceptor};
use afk_guard_metrics::{SamplerConfig, SyntheticMetricsSource};

/// Window id exposed by the default capture script.
pub const TARGET_WINDOW: u64 = 7;

/// Coordinator wired to scripted subsystems, with compressed timings so the
/// watchdog and pollers resolve within test deadlines.
pub struct Fixture {
    pub coordinator: LockCoordinator,
    pub capture: Arc<CaptureScript>,
    pub input: Arc<InterceptorProbe>,
    pub auth: Arc<ScriptedChallenge>,
}

/// Builds a fixture whose challenge replays `verdicts` in order.
#[allow(dead_code)]
pub fn fixture(verdicts: Vec<AuthVerdict>) -> Fixture {
    let capture = CaptureScript::with_windows(vec![CaptureScript::window(
        TARGET_WINDOW,
        "Editor",
        640.0,
        480.0,
    )]);
    let input = InterceptorProbe::new(true);
    let auth = Arc::new(ScriptedChallenge::new(verdicts));

    let coordinator = LockCoordinator::with_configs(
        Arc::new(SyntheticCaptureProvider::new(Arc::clone(&capture))),
        Box::new(SyntheticInterceptor::new(Arc::clone(&input))),
        Arc::clone(&auth) as Arc<dyn AuthChallenge>,
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

    Fixture {
        coordinator,
        capture,
        input,
        auth,
    }
}

/// Selects the scripted target window and activates a session.
#[allow(dead_code)]
pub fn select_and_activate(fixture: &mut Fixture) {
    let windows = fixture
        .coordinator
        .available_windows()
        .expect("scripted enumeration");
    let target = windows
        .into_iter()
        .find(|window| window.id == TARGET_WINDOW)
        .expect("scripted target window");
    fixture.coordinator.select_window(target);
    fixture.coordinator.activate().expect("activation");
}

/// Polls `condition` every few milliseconds until it holds or the deadline
/// passes. Returns whether it held.
#[allow(dead_code)]
pub fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

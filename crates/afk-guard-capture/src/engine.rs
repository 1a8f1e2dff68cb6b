//! Dual-path capture runtime.
//!
//! Owns the fallback poller thread, the watchdog timer, and the primary
//! stream handle; feeds their observations through the pure
//! [`failover`](crate::failover) machine and executes the commands it
//! returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use afk_guard_core::{Frame, LockError, WindowHandle};

use crate::failover::{FailoverCommand, FailoverEvent, FailoverState};
use crate::{CaptureError, CaptureProvider, StreamConfig, StreamControl, StreamEvent, StreamEventHandler};

/// Tunable engine timings. The defaults were chosen empirically: the primary
/// path is known to stay silent on some OS/window combinations, and three
/// seconds of fallback coverage is long enough to be sure.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Fallback snapshot interval.
    pub poll_interval: Duration,
    /// How long the primary may stay silent before the lag is reported.
    pub watchdog_timeout: Duration,
    /// Primary stream cadence.
    pub stream_fps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            watchdog_timeout: Duration::from_secs(3),
            stream_fps: 10,
        }
    }
}

/// Owned consumer callback receiving every delivered frame.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Owned consumer callback receiving non-fatal capture errors.
pub type ErrorCallback = Arc<dyn Fn(LockError) + Send + Sync>;

struct EngineCore {
    provider: Arc<dyn CaptureProvider>,
    window_id: u64,
    stream_config: StreamConfig,
    watchdog_timeout: Duration,
    on_frame: FrameCallback,
    on_error: ErrorCallback,
    state: Mutex<FailoverState>,
    fallback_active: AtomicBool,
    stopped: AtomicBool,
    stream: Mutex<Option<Box<dyn StreamControl>>>,
    watchdog_cancel: Mutex<Option<mpsc::Sender<()>>>,
}

struct EngineRuntime {
    core: Arc<EngineCore>,
    poller: Option<JoinHandle<()>>,
}

/// Dual-path window capture engine.
pub struct CaptureEngine {
    provider: Arc<dyn CaptureProvider>,
    config: EngineConfig,
    runtime: Option<EngineRuntime>,
}

impl CaptureEngine {
    /// Creates an engine over `provider` with default timings.
    pub fn new(provider: Arc<dyn CaptureProvider>) -> Self {
        Self::with_config(provider, EngineConfig::default())
    }

    /// Creates an engine with caller-tuned timings.
    pub fn with_config(provider: Arc<dyn CaptureProvider>, config: EngineConfig) -> Self {
        Self {
            provider,
            config,
            runtime: None,
        }
    }

    /// Starts both acquisition paths for `target`.
    ///
    /// The target is re-resolved against the live enumeration so a stale
    /// handle surfaces as an error instead of a silent black mirror. The
    /// fallback poller delivers its first frame within one poll interval;
    /// the primary stream takes over the moment it proves live.
    ///
    /// # Errors
    /// Returns [`CaptureError::WindowNotFound`] when the target is gone, or
    /// an enumeration/config error. A failed *primary* start is not an
    /// error here; it is reported through `on_error` while the fallback
    /// keeps covering.
    pub fn start(
        &mut self,
        target: &WindowHandle,
        on_frame: impl Fn(Frame) + Send + Sync + 'static,
        on_error: impl Fn(LockError) + Send + Sync + 'static,
    ) -> Result<(), CaptureError> {
        self.stop();

        let windows = self.provider.list_windows()?;
        let live = windows
            .iter()
            .find(|window| window.id == target.id)
            .ok_or(CaptureError::WindowNotFound(target.id))?;

        let scale = self.provider.scale_factor(target.id);
        let stream_config = StreamConfig::new(
            (live.bounds.width * scale).round() as u32,
            (live.bounds.height * scale).round() as u32,
            self.config.stream_fps,
        )?;
        log::info!(
            "capture starting for window {} at {}x{} / {} fps",
            target.id,
            stream_config.width,
            stream_config.height,
            stream_config.fps
        );

        let core = Arc::new(EngineCore {
            provider: Arc::clone(&self.provider),
            window_id: target.id,
            stream_config,
            watchdog_timeout: self.config.watchdog_timeout,
            on_frame: Arc::new(on_frame),
            on_error: Arc::new(on_error),
            state: Mutex::new(FailoverState::new()),
            fallback_active: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stream: Mutex::new(None),
            watchdog_cancel: Mutex::new(None),
        });

        let poller = spawn_fallback_poller(Arc::clone(&core), self.config.poll_interval);
        start_primary(&core);

        self.runtime = Some(EngineRuntime {
            core,
            poller: Some(poller),
        });
        Ok(())
    }

    /// Cancels both paths. Idempotent and safe to call if start never
    /// completed.
    pub fn stop(&mut self) {
        let Some(mut runtime) = self.runtime.take() else {
            return;
        };

        runtime.core.stopped.store(true, Ordering::SeqCst);
        cancel_watchdog(&runtime.core);
        let control = runtime
            .core
            .stream
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(mut control) = control {
            control.stop();
        }
        if let Some(poller) = runtime.poller.take() {
            let _ = poller.join();
        }
        log::info!("capture stopped for window {}", runtime.core.window_id);
    }

    /// Returns `true` while the engine is running.
    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Returns `true` once the primary path has proven itself live.
    pub fn primary_live(&self) -> bool {
        self.runtime
            .as_ref()
            .and_then(|runtime| runtime.core.state.lock().ok().map(|state| state.primary_live()))
            .unwrap_or(false)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_fallback_poller(core: Arc<EngineCore>, interval: Duration) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !core.stopped.load(Ordering::SeqCst) {
            std::thread::sleep(interval);
            if core.stopped.load(Ordering::SeqCst) {
                break;
            }
            if !core.fallback_active.load(Ordering::SeqCst) {
                continue;
            }

            match core.provider.snapshot_window(core.window_id) {
                Ok(Some(frame)) => {
                    // Deliver under the failover lock: once the machine
                    // retires the fallback, no snapshot slips out after it.
                    let Ok(_state) = core.state.lock() else { break };
                    if core.fallback_active.load(Ordering::SeqCst)
                        && !core.stopped.load(Ordering::SeqCst)
                    {
                        (core.on_frame)(frame);
                    }
                }
                Ok(None) => {
                    // Transient miss; a single dropped frame is not an error.
                }
                Err(error) => {
                    log::debug!("fallback snapshot failed: {error}");
                }
            }
        }
    })
}

fn start_primary(core: &Arc<EngineCore>) {
    let handler = stream_handler(core);
    match core
        .provider
        .start_stream(core.window_id, core.stream_config, handler)
    {
        Ok(control) => {
            if let Ok(mut guard) = core.stream.lock() {
                *guard = Some(control);
            }
            arm_watchdog(core);
        }
        Err(error) => {
            let detail = error.to_string();
            log::warn!("primary stream start failed: {detail}");
            if let Ok(mut state) = core.state.lock() {
                // Disarms the watchdog; the fallback is already covering.
                let _ = state.apply(FailoverEvent::PrimaryStopped(detail.clone()));
            }
            (core.on_error)(LockError::CaptureStartFailed(detail));
        }
    }
}

fn stream_handler(core: &Arc<EngineCore>) -> StreamEventHandler {
    let weak = Arc::downgrade(core);
    Arc::new(move |event| {
        let Some(core) = weak.upgrade() else { return };
        if core.stopped.load(Ordering::SeqCst) {
            return;
        }
        match event {
            StreamEvent::Frame(frame) => {
                dispatch(&core, FailoverEvent::PrimaryFrame);
                if !core.stopped.load(Ordering::SeqCst) {
                    (core.on_frame)(frame);
                }
            }
            StreamEvent::Stopped(detail) => {
                dispatch(&core, FailoverEvent::PrimaryStopped(detail));
            }
        }
    })
}

fn dispatch(core: &Arc<EngineCore>, event: FailoverEvent) {
    let commands = {
        let Ok(mut state) = core.state.lock() else { return };
        let commands = state.apply(event);
        // Flag flips happen under the lock so fallback delivery serializes
        // with retirement.
        for command in &commands {
            match command {
                FailoverCommand::StopFallback => {
                    core.fallback_active.store(false, Ordering::SeqCst);
                }
                FailoverCommand::StartFallback => {
                    core.fallback_active.store(true, Ordering::SeqCst);
                }
                _ => {}
            }
        }
        commands
    };

    for command in commands {
        match command {
            FailoverCommand::StopFallback => {
                log::info!("primary stream live; fallback retired");
                cancel_watchdog(core);
            }
            FailoverCommand::StartFallback => {
                log::info!("fallback polling revived");
            }
            FailoverCommand::RestartPrimary => start_primary(core),
            // Arming is folded into a successful primary start.
            FailoverCommand::ArmWatchdog => {}
            FailoverCommand::ReportStartupLag => {
                log::warn!("primary stream silent past the watchdog window");
                (core.on_error)(LockError::CaptureStartFailed(
                    "primary stream delivered no frames within the watchdog window; continuing on fallback"
                        .to_string(),
                ));
            }
            FailoverCommand::ReportInterruption(detail) => {
                log::warn!("primary stream interrupted: {detail}");
                (core.on_error)(LockError::CaptureInterrupted(detail));
            }
        }
    }
}

fn arm_watchdog(core: &Arc<EngineCore>) {
    let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
    if let Ok(mut guard) = core.watchdog_cancel.lock() {
        // Replacing the sender cancels any previous timer.
        *guard = Some(cancel_tx);
    }

    let weak = Arc::downgrade(core);
    let timeout = core.watchdog_timeout;
    std::thread::spawn(move || {
        if let Err(mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
            if let Some(core) = weak.upgrade() {
                dispatch(&core, FailoverEvent::WatchdogFired);
            }
        }
    });
}

fn cancel_watchdog(core: &Arc<EngineCore>) {
    if let Ok(mut guard) = core.watchdog_cancel.lock() {
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    //! Behavioral tests for the dual-path runtime, driven through the
    //! scripted provider with compressed timings.

    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use afk_guard_core::LockError;

    use super::*;
    use crate::synthetic::{CaptureScript, SyntheticCaptureProvider};

    const POLL: Duration = Duration::from_millis(10);

    fn test_config(watchdog_ms: u64) -> EngineConfig {
        EngineConfig {
            poll_interval: POLL,
            watchdog_timeout: Duration::from_millis(watchdog_ms),
            stream_fps: 10,
        }
    }

    struct Harness {
        script: Arc<CaptureScript>,
        engine: CaptureEngine,
        frames: Arc<Mutex<Vec<(u32, u32)>>>,
        errors: Arc<Mutex<Vec<LockError>>>,
    }

    impl Harness {
        fn new(watchdog_ms: u64) -> Self {
            // Fallback snapshots are 40x40 (the scripted window size);
            // primary frames pushed by tests are 80x80 so the two paths are
            // distinguishable in the delivery log.
            let script =
                CaptureScript::with_windows(vec![CaptureScript::window(1, "Editor", 40.0, 40.0)]);
            let provider = Arc::new(SyntheticCaptureProvider::new(Arc::clone(&script)));
            Self {
                script,
                engine: CaptureEngine::with_config(provider, test_config(watchdog_ms)),
                frames: Arc::new(Mutex::new(Vec::new())),
                errors: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn start(&mut self) {
            let frames = Arc::clone(&self.frames);
            let errors = Arc::clone(&self.errors);
            let target = CaptureScript::window(1, "Editor", 40.0, 40.0);
            self.engine
                .start(
                    &target,
                    move |frame| frames.lock().unwrap().push((frame.width, frame.height)),
                    move |error| errors.lock().unwrap().push(error),
                )
                .expect("engine should start");
        }

        fn primary_frame(&self) -> afk_guard_core::Frame {
            afk_guard_core::Frame::new(80, 80, vec![0xff; 80 * 80 * 4]).expect("valid frame")
        }

        fn frame_log(&self) -> Vec<(u32, u32)> {
            self.frames.lock().unwrap().clone()
        }

        fn error_log(&self) -> Vec<LockError> {
            self.errors.lock().unwrap().clone()
        }
    }

    #[test]
    fn fallback_delivers_within_one_interval() {
        let mut harness = Harness::new(10_000);
        harness.start();
        std::thread::sleep(POLL * 5);
        assert!(harness.frame_log().iter().any(|size| *size == (40, 40)));
        harness.engine.stop();
    }

    #[test]
    fn silent_primary_reports_lag_and_fallback_persists() {
        let mut harness = Harness::new(30);
        harness.start();
        std::thread::sleep(Duration::from_millis(120));

        let lagged = harness.error_log().iter().any(|error| {
            matches!(error, LockError::CaptureStartFailed(detail) if detail.contains("watchdog"))
        });
        assert!(lagged, "startup lag should be reported once");

        let before = harness.script.snapshots_served();
        std::thread::sleep(POLL * 6);
        assert!(
            harness.script.snapshots_served() > before,
            "fallback must keep polling indefinitely"
        );
        harness.engine.stop();
    }

    #[test]
    fn first_primary_frame_retires_fallback_for_good() {
        let mut harness = Harness::new(10_000);
        harness.start();
        std::thread::sleep(POLL * 4);
        assert!(harness.script.push_primary_frame(harness.primary_frame()));
        assert!(harness.engine.primary_live());

        std::thread::sleep(POLL * 8);
        let log = harness.frame_log();
        let first_primary = log
            .iter()
            .position(|size| *size == (80, 80))
            .expect("primary frame should be delivered");
        assert!(
            log[first_primary..].iter().all(|size| *size == (80, 80)),
            "no fallback frame may follow the first primary frame"
        );
        harness.engine.stop();
    }

    #[test]
    fn primary_death_revives_fallback_and_retries() {
        let mut harness = Harness::new(10_000);
        harness.start();
        assert!(harness.script.push_primary_frame(harness.primary_frame()));
        assert_eq!(harness.script.stream_starts(), 1);

        harness.script.fail_primary("stream died");
        assert!(
            harness
                .error_log()
                .iter()
                .any(|error| matches!(error, LockError::CaptureInterrupted(_)))
        );
        assert_eq!(harness.script.stream_starts(), 2, "primary should be retried");
        assert!(!harness.engine.primary_live());

        let before = harness.script.snapshots_served();
        std::thread::sleep(POLL * 6);
        assert!(
            harness.script.snapshots_served() > before,
            "fallback must revive after a live primary dies"
        );
        harness.engine.stop();
    }

    #[test]
    fn failed_primary_start_is_nonfatal() {
        let mut harness = Harness::new(10_000);
        harness.script.set_stream_start_fails(true);
        harness.start();
        std::thread::sleep(POLL * 4);

        assert!(
            harness
                .error_log()
                .iter()
                .any(|error| matches!(error, LockError::CaptureStartFailed(_)))
        );
        assert!(
            harness.frame_log().iter().any(|size| *size == (40, 40)),
            "fallback still covers when the primary cannot start"
        );
        harness.engine.stop();
    }

    #[test]
    fn start_rejects_vanished_window() {
        let mut harness = Harness::new(10_000);
        harness.script.set_windows(Vec::new());
        let target = CaptureScript::window(1, "Editor", 40.0, 40.0);
        let result = harness.engine.start(&target, |_| {}, |_| {});
        assert!(matches!(result, Err(CaptureError::WindowNotFound(1))));
        assert!(!harness.engine.is_running());
    }

    #[test]
    fn stop_is_idempotent_and_safe_without_start() {
        let mut harness = Harness::new(10_000);
        harness.engine.stop();
        harness.start();
        harness.engine.stop();
        harness.engine.stop();
        assert!(!harness.engine.is_running());
        assert!(!harness.script.stream_active());
    }
}

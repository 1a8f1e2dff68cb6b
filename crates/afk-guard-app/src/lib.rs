#![warn(missing_docs)]
//! # afk-guard-app
//!
//! ## Purpose
//! Owns the lock session lifecycle: activation gating, input blocking,
//! window mirroring, telemetry, re-authentication, and teardown.
//!
//! ## Responsibilities
//! - Drive the pure session machine ([`machine`]) and execute its effects
//!   against the owned subsystems.
//! - Gate activation on ground-truth permission probes and a live target
//!   window.
//! - Surface session observables (state, errors, latest frame, latest
//!   telemetry) to a display layer without exposing subsystem internals.
//!
//! ## Data flow
//! The interception thread and the capture/telemetry threads never call back
//! into the coordinator; they write to shared observables or post an unlock
//! signal the shell drains with [`LockCoordinator::try_recv_unlock_request`].
//! All state transitions happen on the caller's thread.
//!
//! ## Ownership and lifetimes
//! The coordinator owns every subsystem for its whole lifetime. Dropping it
//! force-exits any active session, so interception can never outlive the
//! process shell.
//!
//! ## Error model
//! Activation failures return [`LockError`] and leave the coordinator idle.
//! Failures inside a locked session (blocker install, capture interruption,
//! rejected challenge) are recorded as session errors and never unlock.

use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use afk_guard_auth::{AuthChallenge, AuthVerdict};
use afk_guard_capture::engine::{CaptureEngine, EngineConfig};
use afk_guard_capture::{CaptureError, CaptureProvider};
use afk_guard_core::{Capability, Frame, LockError, LockState, MetricsSnapshot, WindowHandle};
use afk_guard_input::{InputBlocker, InputInterceptor};
use afk_guard_metrics::{MetricsSampler, MetricsSource, SamplerConfig};
use afk_guard_permissions::PermissionValidator;

pub mod machine;

use machine::{Effect, Input};

/// Application version baked in from the workspace VERSION file.
pub fn app_version() -> &'static str {
    env!("AFK_GUARD_VERSION")
}

/// Factory producing a fresh counter source for each session.
pub type MetricsSourceFactory = Box<dyn Fn() -> Box<dyn MetricsSource> + Send>;

/// Observables shared with the capture and telemetry threads.
#[derive(Default)]
struct SessionObservables {
    latest_frame: Mutex<Option<Frame>>,
    latest_metrics: Mutex<MetricsSnapshot>,
    lock_error: Mutex<Option<LockError>>,
    capture_error: Mutex<Option<LockError>>,
    started_at: Mutex<Option<SystemTime>>,
}

impl SessionObservables {
    fn store_frame(&self, frame: Frame) {
        if let Ok(mut guard) = self.latest_frame.lock() {
            *guard = Some(frame);
        }
    }

    fn store_metrics(&self, snapshot: MetricsSnapshot) {
        if let Ok(mut guard) = self.latest_metrics.lock() {
            *guard = snapshot;
        }
    }

    fn set_lock_error(&self, error: LockError) {
        log::warn!("session error recorded: {error}");
        if let Ok(mut guard) = self.lock_error.lock() {
            *guard = Some(error);
        }
    }

    fn set_capture_error(&self, error: LockError) {
        log::warn!("capture error recorded: {error}");
        if let Ok(mut guard) = self.capture_error.lock() {
            *guard = Some(error);
        }
    }

    fn reset_errors(&self) {
        if let Ok(mut guard) = self.lock_error.lock() {
            *guard = None;
        }
        if let Ok(mut guard) = self.capture_error.lock() {
            *guard = None;
        }
    }

    fn mark_started(&self) {
        if let Ok(mut guard) = self.started_at.lock() {
            *guard = Some(SystemTime::now());
        }
    }

    fn clear(&self) {
        // The last lock_error survives into idle so a display layer can
        // still show why the previous session degraded.
        if let Ok(mut guard) = self.latest_frame.lock() {
            *guard = None;
        }
        if let Ok(mut guard) = self.latest_metrics.lock() {
            *guard = MetricsSnapshot::empty();
        }
        if let Ok(mut guard) = self.capture_error.lock() {
            *guard = None;
        }
        if let Ok(mut guard) = self.started_at.lock() {
            *guard = None;
        }
    }
}

/// Orchestrates one lock session at a time over the owned subsystems.
pub struct LockCoordinator {
    provider: Arc<dyn CaptureProvider>,
    auth: Arc<dyn AuthChallenge>,
    engine: CaptureEngine,
    blocker: InputBlocker,
    sampler: MetricsSampler,
    validator: PermissionValidator,
    metrics_source: MetricsSourceFactory,
    state: LockState,
    selected: Option<WindowHandle>,
    session: Arc<SessionObservables>,
    unlock_rx: Receiver<()>,
    blocker_installed: bool,
    pending_verdict: Option<AuthVerdict>,
}

impl LockCoordinator {
    /// Creates a coordinator with default capture and sampling timings.
    pub fn new(
        provider: Arc<dyn CaptureProvider>,
        interceptor: Box<dyn InputInterceptor>,
        auth: Arc<dyn AuthChallenge>,
        metrics_source: MetricsSourceFactory,
    ) -> Self {
        Self::with_configs(
            provider,
            interceptor,
            auth,
            metrics_source,
            EngineConfig::default(),
            SamplerConfig::default(),
        )
    }

    /// Creates a coordinator with explicit subsystem timings.
    pub fn with_configs(
        provider: Arc<dyn CaptureProvider>,
        interceptor: Box<dyn InputInterceptor>,
        auth: Arc<dyn AuthChallenge>,
        metrics_source: MetricsSourceFactory,
        engine_config: EngineConfig,
        sampler_config: SamplerConfig,
    ) -> Self {
        let (unlock_tx, unlock_rx): (Sender<()>, Receiver<()>) = channel();
        let blocker = InputBlocker::new(interceptor, move || {
            // Interception thread context; post and return.
            let _ = unlock_tx.send(());
        });

        Self {
            engine: CaptureEngine::with_config(Arc::clone(&provider), engine_config),
            provider,
            auth,
            blocker,
            sampler: MetricsSampler::with_config(sampler_config),
            validator: PermissionValidator::new(),
            metrics_source,
            state: LockState::Idle,
            selected: None,
            session: Arc::new(SessionObservables::default()),
            unlock_rx,
            blocker_installed: false,
            pending_verdict: None,
        }
    }

    /// Enumerates windows eligible for selection.
    ///
    /// # Errors
    /// Returns [`LockError::PermissionDenied`] when the live enumeration is
    /// refused outright.
    pub fn available_windows(&self) -> Result<Vec<WindowHandle>, LockError> {
        self.provider
            .list_windows()
            .map_err(|_| LockError::PermissionDenied(Capability::ScreenCapture))
    }

    /// Selects the mirror target for the next session. Ignored while a
    /// session is active.
    pub fn select_window(&mut self, window: WindowHandle) {
        if self.state != LockState::Idle {
            log::warn!("window selection ignored during an active session");
            return;
        }
        log::info!("selected window {} ({})", window.id, window.display_name());
        self.selected = Some(window);
    }

    /// Returns the currently selected mirror target.
    pub fn selected_window(&self) -> Option<&WindowHandle> {
        self.selected.as_ref()
    }

    /// Starts a lock session for the selected window.
    ///
    /// The preconditions are probed fresh on every call: capture permission
    /// by live enumeration, target presence against that same enumeration. A
    /// blocker install failure degrades the session but does not abort it.
    ///
    /// # Errors
    /// Returns the precondition or startup failure; the coordinator is idle
    /// again when this returns an error.
    pub fn activate(&mut self) -> Result<(), LockError> {
        if self.state != LockState::Idle {
            log::warn!("activation ignored; a session is already active");
            return Ok(());
        }

        // Errors shown while idle describe the previous attempt; this one
        // starts clean.
        self.session.reset_errors();

        let capture_granted = self.validator.check_capture(self.provider.as_ref());
        let window_found = match (&self.selected, capture_granted) {
            (Some(target), true) => self
                .provider
                .list_windows()
                .map(|windows| windows.iter().any(|window| window.id == target.id))
                .unwrap_or(false),
            _ => false,
        };

        self.apply(Input::Activate {
            has_selection: self.selected.is_some(),
            capture_granted,
            window_found,
        })?;

        let blocker_installed = self.blocker_installed;
        self.apply(Input::SetupFinished { blocker_installed })?;

        self.session.mark_started();
        log::info!("lock session active");
        Ok(())
    }

    /// Runs one re-authentication cycle: suspend blocking, present the
    /// challenge, and either tear the session down or re-lock.
    ///
    /// Returns `true` when the session ended. A no-op outside the locked
    /// state.
    pub fn request_unlock(&mut self) -> bool {
        if self.state != LockState::Locked {
            return false;
        }

        if self.apply(Input::UnlockRequested).is_err() {
            return false;
        }
        let verdict = self
            .pending_verdict
            .take()
            .unwrap_or(AuthVerdict::Unavailable);
        let _ = self.apply(Input::ChallengeResult(verdict));

        let unlocked = self.state == LockState::Idle;
        if unlocked {
            log::info!("lock session ended by successful re-authentication");
        }
        unlocked
    }

    /// Tears down any active session unconditionally.
    pub fn force_exit(&mut self) {
        if self.state != LockState::Idle {
            log::warn!("force exit from state {:?}", self.state);
        }
        let _ = self.apply(Input::ForceExit);
    }

    /// Drains pending unlock signals posted by the interception thread.
    ///
    /// Returns `true` when at least one signal was pending.
    pub fn try_recv_unlock_request(&mut self) -> bool {
        let mut any = false;
        loop {
            match self.unlock_rx.try_recv() {
                Ok(()) => any = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        any
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LockState {
        self.state
    }

    /// Last recorded session error, if any.
    pub fn lock_error(&self) -> Option<LockError> {
        self.session.lock_error.lock().ok().and_then(|g| g.clone())
    }

    /// Last recorded capture-path error, if any.
    pub fn capture_error(&self) -> Option<LockError> {
        self.session
            .capture_error
            .lock()
            .ok()
            .and_then(|g| g.clone())
    }

    /// Most recent mirror frame of the active session.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.session.latest_frame.lock().ok().and_then(|g| g.clone())
    }

    /// Most recent telemetry snapshot of the active session.
    pub fn latest_metrics(&self) -> MetricsSnapshot {
        self.session
            .latest_metrics
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Wall-clock start of the active session.
    pub fn session_started_at(&self) -> Option<SystemTime> {
        self.session.started_at.lock().ok().and_then(|g| *g)
    }

    /// Returns `true` while input interception is active.
    pub fn input_blocking_active(&self) -> bool {
        self.blocker.is_installed()
    }

    /// Returns `true` once the primary capture path has proven live.
    pub fn primary_capture_live(&self) -> bool {
        self.engine.primary_live()
    }

    fn apply(&mut self, input: Input) -> Result<(), LockError> {
        let (next, effects) = machine::step(self.state, input);
        self.state = next;

        let mut failure: Option<LockError> = None;
        for effect in effects {
            match effect {
                Effect::AbortWithError(error) => {
                    failure = Some(error);
                }
                Effect::InstallBlocker => {
                    self.blocker_installed = self.blocker.install();
                }
                Effect::StartCapture => {
                    if let Err(error) = self.start_capture() {
                        failure = Some(error);
                    }
                }
                Effect::StartMetrics => self.start_metrics(),
                Effect::RecordWarning(error) => self.session.set_lock_error(error),
                Effect::SuspendBlocker => self.blocker.suspend(),
                Effect::PresentChallenge => {
                    self.pending_verdict = Some(self.auth.challenge());
                }
                Effect::ResumeBlocker => {
                    if !self.blocker.resume() {
                        self.session
                            .set_lock_error(LockError::InputBlockInstallFailed);
                    }
                }
                Effect::StopMetrics => self.sampler.stop(),
                Effect::StopCapture => self.engine.stop(),
                Effect::TeardownBlocker => self.blocker.teardown(),
                Effect::ClearSession => {
                    self.session.clear();
                    let _ = self.try_recv_unlock_request();
                }
            }
        }

        match failure {
            Some(error) => {
                // A startup failure mid-activation unwinds whatever already
                // started before reporting.
                if self.state == LockState::Activating {
                    let _ = self.apply(Input::ForceExit);
                }
                self.session.set_lock_error(error.clone());
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn start_capture(&mut self) -> Result<(), LockError> {
        let target = self.selected.clone().ok_or(LockError::NoWindowSelected)?;
        let frames = Arc::clone(&self.session);
        let errors = Arc::clone(&self.session);

        self.engine
            .start(
                &target,
                move |frame| frames.store_frame(frame),
                move |error| errors.set_capture_error(error),
            )
            .map_err(|error| match error {
                CaptureError::WindowNotFound(_) => LockError::WindowNotFound,
                other => LockError::CaptureStartFailed(other.to_string()),
            })
    }

    fn start_metrics(&mut self) {
        let session = Arc::clone(&self.session);
        let source = (self.metrics_source)();
        self.sampler.start(
            source,
            Arc::new(move |snapshot| session.store_metrics(snapshot)),
        );
    }
}

impl Drop for LockCoordinator {
    fn drop(&mut self) {
        self.force_exit();
    }
}

#![warn(missing_docs)]
//! # afk-guard-permissions
//!
//! ## Purpose
//! Proves, rather than queries, whether the process currently holds the two
//! capabilities a lock session depends on: screen capture and global input
//! interception.
//!
//! ## Responsibilities
//! - Probe capture permission by attempting a live window enumeration.
//! - Probe input permission by installing a transparent interceptor and
//!   immediately removing it.
//! - Cache the last observed verdicts for display without re-probing.
//!
//! ## Error model
//! Probes have no error path of their own; a failed probe IS the verdict.
//! Cached OS permission flags can go stale after a grant-then-restart cycle,
//! so nothing here consults them.

use afk_guard_capture::CaptureProvider;
use afk_guard_core::PermissionState;
use afk_guard_input::{EventDisposition, InputInterceptor};

/// Live capability prober with a cached last verdict.
#[derive(Debug, Default)]
pub struct PermissionValidator {
    last: PermissionState,
}

impl PermissionValidator {
    /// Creates a validator with both capabilities assumed absent until
    /// probed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes screen capture by asking for the live window list.
    ///
    /// Only a successful enumeration of at least one window proves the
    /// capability: an unauthorized process typically receives an empty list
    /// rather than an error.
    pub fn check_capture(&mut self, provider: &dyn CaptureProvider) -> bool {
        let granted = match provider.list_windows() {
            Ok(windows) => !windows.is_empty(),
            Err(error) => {
                log::debug!("capture probe enumeration failed: {error}");
                false
            }
        };
        self.record(|state| state.capture_granted = granted);
        if !granted {
            self.log_denial("screen capture");
        }
        granted
    }

    /// Probes input interception by installing a pass-through interceptor
    /// and tearing it down immediately.
    ///
    /// The probe handler passes every event untouched, so a probe during
    /// normal use is invisible to the user.
    pub fn check_input_interception(&mut self, interceptor: &mut dyn InputInterceptor) -> bool {
        let granted = interceptor.install(Box::new(|_| EventDisposition::PassThrough));
        if granted {
            interceptor.uninstall();
        }
        self.record(|state| state.input_intercept_granted = granted);
        if !granted {
            self.log_denial("input interception");
        }
        granted
    }

    /// Returns the verdicts from the most recent probes.
    pub fn snapshot(&self) -> PermissionState {
        self.last
    }

    fn record(&mut self, update: impl FnOnce(&mut PermissionState)) {
        update(&mut self.last);
        self.last.checks_performed += 1;
    }

    fn log_denial(&self, capability: &str) {
        // First denial at warn, repeats at debug, so a polling caller does
        // not flood the log.
        if self.last.checks_performed <= 1 {
            log::warn!("{capability} capability not granted");
        } else {
            log::debug!("{capability} capability still not granted");
        }
    }
}

#[cfg(test)]
mod tests {
    //! Probe behavior over scripted capture and input backends.

    use afk_guard_capture::{CaptureScript, SyntheticCaptureProvider};
    use afk_guard_input::{InterceptorProbe, SyntheticInterceptor};

    use super::*;

    #[test]
    fn capture_probe_requires_a_nonempty_enumeration() {
        let script = CaptureScript::with_windows(vec![]);
        let provider = SyntheticCaptureProvider::new(std::sync::Arc::clone(&script));
        let mut validator = PermissionValidator::new();

        assert!(!validator.check_capture(&provider));
        assert!(!validator.snapshot().capture_granted);

        script.set_windows(vec![CaptureScript::window(7, "Editor", 800.0, 600.0)]);
        assert!(validator.check_capture(&provider));
        assert!(validator.snapshot().capture_granted);
    }

    #[test]
    fn capture_probe_treats_enumeration_failure_as_denial() {
        let script = CaptureScript::with_windows(vec![CaptureScript::window(
            7, "Editor", 800.0, 600.0,
        )]);
        script.set_enumeration_fails(true);
        let provider = SyntheticCaptureProvider::new(std::sync::Arc::clone(&script));
        let mut validator = PermissionValidator::new();

        assert!(!validator.check_capture(&provider));
    }

    #[test]
    fn input_probe_installs_and_removes_a_transparent_tap() {
        let probe = InterceptorProbe::new(true);
        let mut interceptor = SyntheticInterceptor::new(std::sync::Arc::clone(&probe));
        let mut validator = PermissionValidator::new();

        assert!(validator.check_input_interception(&mut interceptor));
        assert!(!probe.is_installed());
        assert_eq!(probe.install_attempts(), 1);
        assert!(validator.snapshot().input_intercept_granted);
    }

    #[test]
    fn input_probe_reports_denied_installs() {
        let probe = InterceptorProbe::new(false);
        let mut interceptor = SyntheticInterceptor::new(std::sync::Arc::clone(&probe));
        let mut validator = PermissionValidator::new();

        assert!(!validator.check_input_interception(&mut interceptor));
        assert!(!validator.snapshot().input_intercept_granted);
    }

    #[test]
    fn snapshot_counts_probes_for_log_throttling() {
        let script = CaptureScript::with_windows(vec![]);
        let provider = SyntheticCaptureProvider::new(std::sync::Arc::clone(&script));
        let mut validator = PermissionValidator::new();

        let _ = validator.check_capture(&provider);
        let _ = validator.check_capture(&provider);
        assert_eq!(validator.snapshot().checks_performed, 2);
    }
}

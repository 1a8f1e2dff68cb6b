//! Pure lock session state machine.
//!
//! The coordinator feeds observations in and executes the returned effects
//! against its owned subsystems. Keeping the transition rules free of threads
//! and side effects makes every lifecycle path testable in isolation.

use afk_guard_auth::AuthVerdict;
use afk_guard_core::{Capability, LockError, LockState};

/// Observation fed into the session machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// The user asked to start a lock session. The flags carry the
    /// preconditions the coordinator has already probed.
    Activate {
        /// A target window has been selected.
        has_selection: bool,
        /// The capture capability probe passed.
        capture_granted: bool,
        /// The selected window is still present in the live enumeration.
        window_found: bool,
    },
    /// Subsystem startup finished; the blocker flag reports whether input
    /// interception actually installed.
    SetupFinished {
        /// Input interception install outcome.
        blocker_installed: bool,
    },
    /// A swallowed quit chord asked for re-authentication.
    UnlockRequested,
    /// The re-authentication challenge resolved.
    ChallengeResult(AuthVerdict),
    /// Emergency teardown (panic chord or process shutdown).
    ForceExit,
}

/// Side effect the coordinator must execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Activation cannot proceed; record the error and stay idle.
    AbortWithError(LockError),
    /// Install global input interception.
    InstallBlocker,
    /// Start the window mirror.
    StartCapture,
    /// Start telemetry sampling.
    StartMetrics,
    /// Record a non-fatal session error.
    RecordWarning(LockError),
    /// Lift input interception so the challenge UI can receive input.
    SuspendBlocker,
    /// Present the re-authentication challenge.
    PresentChallenge,
    /// Reinstall input interception after a failed challenge.
    ResumeBlocker,
    /// Stop telemetry sampling.
    StopMetrics,
    /// Stop the window mirror.
    StopCapture,
    /// Permanently remove input interception.
    TeardownBlocker,
    /// Clear per-session state (errors, frames, start time).
    ClearSession,
}

/// Effects that end a session, in teardown order: telemetry first, then the
/// mirror, then input interception, so the user regains control last only
/// after everything observing them has stopped.
fn teardown_effects() -> Vec<Effect> {
    vec![
        Effect::StopMetrics,
        Effect::StopCapture,
        Effect::TeardownBlocker,
        Effect::ClearSession,
    ]
}

/// Applies one input to the session lifecycle.
///
/// Inputs that make no sense in the current state (a challenge result while
/// idle, an activation while locked) are ignored rather than rejected; the
/// interception thread and the UI race, and a stale signal must not corrupt
/// the session.
pub fn step(state: LockState, input: Input) -> (LockState, Vec<Effect>) {
    match (state, input) {
        (
            LockState::Idle,
            Input::Activate {
                has_selection,
                capture_granted,
                window_found,
            },
        ) => {
            if !has_selection {
                return (
                    LockState::Idle,
                    vec![Effect::AbortWithError(LockError::NoWindowSelected)],
                );
            }
            if !capture_granted {
                return (
                    LockState::Idle,
                    vec![Effect::AbortWithError(LockError::PermissionDenied(
                        Capability::ScreenCapture,
                    ))],
                );
            }
            if !window_found {
                return (
                    LockState::Idle,
                    vec![Effect::AbortWithError(LockError::WindowNotFound)],
                );
            }
            (
                LockState::Activating,
                vec![
                    Effect::InstallBlocker,
                    Effect::StartCapture,
                    Effect::StartMetrics,
                ],
            )
        }
        (LockState::Activating, Input::SetupFinished { blocker_installed }) => {
            // A failed blocker install degrades the session instead of
            // aborting it; the mirror and telemetry still run.
            let effects = if blocker_installed {
                Vec::new()
            } else {
                vec![Effect::RecordWarning(LockError::InputBlockInstallFailed)]
            };
            (LockState::Locked, effects)
        }
        (LockState::Locked, Input::UnlockRequested) => (
            LockState::Unlocking,
            vec![Effect::SuspendBlocker, Effect::PresentChallenge],
        ),
        (LockState::Unlocking, Input::ChallengeResult(verdict)) => match verdict {
            AuthVerdict::Granted => (LockState::Idle, teardown_effects()),
            AuthVerdict::Denied => (
                LockState::Locked,
                vec![
                    Effect::RecordWarning(LockError::AuthenticationFailed),
                    Effect::ResumeBlocker,
                ],
            ),
            AuthVerdict::Unavailable => (
                LockState::Locked,
                vec![
                    Effect::RecordWarning(LockError::AuthUnavailable),
                    Effect::ResumeBlocker,
                ],
            ),
        },
        (LockState::Idle, Input::ForceExit) => (LockState::Idle, Vec::new()),
        (_, Input::ForceExit) => (LockState::Idle, teardown_effects()),
        (state, input) => {
            log::debug!("ignoring {input:?} in state {state:?}");
            (state, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for session lifecycle transitions.

    use super::*;

    fn activate(has_selection: bool, capture_granted: bool, window_found: bool) -> Input {
        Input::Activate {
            has_selection,
            capture_granted,
            window_found,
        }
    }

    #[test]
    fn activation_preconditions_abort_in_order() {
        let (state, effects) = step(LockState::Idle, activate(false, true, true));
        assert_eq!(state, LockState::Idle);
        assert_eq!(
            effects,
            vec![Effect::AbortWithError(LockError::NoWindowSelected)]
        );

        let (_, effects) = step(LockState::Idle, activate(true, false, true));
        assert_eq!(
            effects,
            vec![Effect::AbortWithError(LockError::PermissionDenied(
                Capability::ScreenCapture
            ))]
        );

        let (_, effects) = step(LockState::Idle, activate(true, true, false));
        assert_eq!(effects, vec![Effect::AbortWithError(LockError::WindowNotFound)]);
    }

    #[test]
    fn successful_activation_starts_all_subsystems() {
        let (state, effects) = step(LockState::Idle, activate(true, true, true));
        assert_eq!(state, LockState::Activating);
        assert_eq!(
            effects,
            vec![
                Effect::InstallBlocker,
                Effect::StartCapture,
                Effect::StartMetrics,
            ]
        );
    }

    #[test]
    fn blocker_install_failure_locks_with_a_warning() {
        let (state, effects) = step(
            LockState::Activating,
            Input::SetupFinished {
                blocker_installed: false,
            },
        );
        assert_eq!(state, LockState::Locked);
        assert_eq!(
            effects,
            vec![Effect::RecordWarning(LockError::InputBlockInstallFailed)]
        );
    }

    #[test]
    fn unlock_suspends_blocker_before_the_challenge() {
        let (state, effects) = step(LockState::Locked, Input::UnlockRequested);
        assert_eq!(state, LockState::Unlocking);
        assert_eq!(effects, vec![Effect::SuspendBlocker, Effect::PresentChallenge]);
    }

    #[test]
    fn granted_challenge_tears_down_in_order() {
        let (state, effects) = step(
            LockState::Unlocking,
            Input::ChallengeResult(AuthVerdict::Granted),
        );
        assert_eq!(state, LockState::Idle);
        assert_eq!(
            effects,
            vec![
                Effect::StopMetrics,
                Effect::StopCapture,
                Effect::TeardownBlocker,
                Effect::ClearSession,
            ]
        );
    }

    #[test]
    fn denied_and_unavailable_challenges_relock() {
        for (verdict, error) in [
            (AuthVerdict::Denied, LockError::AuthenticationFailed),
            (AuthVerdict::Unavailable, LockError::AuthUnavailable),
        ] {
            let (state, effects) = step(LockState::Unlocking, Input::ChallengeResult(verdict));
            assert_eq!(state, LockState::Locked);
            assert_eq!(
                effects,
                vec![Effect::RecordWarning(error), Effect::ResumeBlocker]
            );
        }
    }

    #[test]
    fn force_exit_tears_down_from_any_active_state() {
        for state in [LockState::Activating, LockState::Locked, LockState::Unlocking] {
            let (next, effects) = step(state, Input::ForceExit);
            assert_eq!(next, LockState::Idle);
            assert_eq!(effects.last(), Some(&Effect::ClearSession));
        }

        let (next, effects) = step(LockState::Idle, Input::ForceExit);
        assert_eq!(next, LockState::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn stale_inputs_are_ignored() {
        let (state, effects) = step(
            LockState::Idle,
            Input::ChallengeResult(AuthVerdict::Granted),
        );
        assert_eq!(state, LockState::Idle);
        assert!(effects.is_empty());

        let (state, effects) = step(LockState::Locked, activate(true, true, true));
        assert_eq!(state, LockState::Locked);
        assert!(effects.is_empty());
    }
}

#![warn(missing_docs)]
//! # afk-guard-auth
//!
//! ## Purpose
//! Defines the re-authentication seam used to end a lock session.
//!
//! ## Responsibilities
//! - Abstract the host authentication facility behind [`AuthChallenge`].
//! - Provide deterministic challenge implementations for tests and the demo
//!   shell.
//!
//! ## Data flow
//! The session coordinator suspends input blocking, calls
//! [`AuthChallenge::challenge`], and maps the verdict onto its state machine.
//!
//! ## Error model
//! Challenges do not return `Result`; the tri-state [`AuthVerdict`] separates
//! a rejected attempt from a host with no authentication facility at all, and
//! the coordinator records both as non-fatal session state.
//!
//! ## Security and privacy notes
//! Implementations must never log credentials or biometric material. This
//! crate contains no secrets by construction.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of one re-authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVerdict {
    /// The user proved their identity; the session may end.
    Granted,
    /// The challenge was presented and rejected.
    Denied,
    /// No authentication facility could evaluate the challenge.
    Unavailable,
}

/// External re-authentication collaborator.
///
/// The coordinator guarantees input blocking is suspended before this is
/// called, so the challenge UI can receive input.
pub trait AuthChallenge: Send + Sync {
    /// Presents the challenge and blocks until the user responds.
    fn challenge(&self) -> AuthVerdict;
}

/// Challenge that always returns a fixed verdict.
#[derive(Debug)]
pub struct StaticChallenge {
    verdict: AuthVerdict,
}

impl StaticChallenge {
    /// Creates a challenge with a fixed outcome.
    pub fn new(verdict: AuthVerdict) -> Self {
        Self { verdict }
    }
}

impl AuthChallenge for StaticChallenge {
    fn challenge(&self) -> AuthVerdict {
        log::debug!("static auth challenge returning {:?}", self.verdict);
        self.verdict
    }
}

/// Challenge that replays a scripted verdict sequence.
///
/// Once the script is exhausted, further attempts are denied. The invocation
/// counter lets tests assert how many times the challenge was presented.
pub struct ScriptedChallenge {
    script: Mutex<Vec<AuthVerdict>>,
    presented: AtomicU64,
}

impl ScriptedChallenge {
    /// Creates a challenge replaying `verdicts` in order.
    pub fn new(verdicts: Vec<AuthVerdict>) -> Self {
        let mut script = verdicts;
        script.reverse();
        Self {
            script: Mutex::new(script),
            presented: AtomicU64::new(0),
        }
    }

    /// Returns how many times the challenge has been presented.
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::SeqCst)
    }
}

impl AuthChallenge for ScriptedChallenge {
    fn challenge(&self) -> AuthVerdict {
        self.presented.fetch_add(1, Ordering::SeqCst);
        let verdict = self
            .script
            .lock()
            .map(|mut script| script.pop())
            .unwrap_or(None)
            .unwrap_or(AuthVerdict::Denied);
        log::debug!("scripted auth challenge returning {verdict:?}");
        verdict
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for deterministic challenge implementations.

    use super::*;

    #[test]
    fn scripted_challenge_replays_then_denies() {
        let challenge = ScriptedChallenge::new(vec![AuthVerdict::Denied, AuthVerdict::Granted]);
        assert_eq!(challenge.challenge(), AuthVerdict::Denied);
        assert_eq!(challenge.challenge(), AuthVerdict::Granted);
        assert_eq!(challenge.challenge(), AuthVerdict::Denied);
        assert_eq!(challenge.presented(), 3);
    }

    #[test]
    fn static_challenge_is_constant() {
        let challenge = StaticChallenge::new(AuthVerdict::Unavailable);
        assert_eq!(challenge.challenge(), AuthVerdict::Unavailable);
        assert_eq!(challenge.challenge(), AuthVerdict::Unavailable);
    }
}

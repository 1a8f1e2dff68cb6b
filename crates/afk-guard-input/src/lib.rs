#![warn(missing_docs)]
//! # afk-guard-input
//!
//! ## Purpose
//! Intercepts keyboard and pointer events system-wide while a lock session is
//! active, re-injecting the harmless ones and swallowing the rest.
//!
//! ## Responsibilities
//! - Classify events against the lock policy ([`classify_event`]).
//! - Abstract the OS interception point behind [`InputInterceptor`].
//! - Tie interception lifetime to [`InputBlocker`] install/teardown.
//! - Provide a deterministic interceptor for tests.
//! - Provide a real session event tap on macOS.
//!
//! ## Data flow
//! The OS delivers raw events to the installed interceptor, which translates
//! them into [`InputEvent`] values and asks the registered handler for a
//! disposition. Swallowed events never reach other applications.
//!
//! ## Ownership and lifetimes
//! The event handler is an owned closure registered at install time and
//! dropped at uninstall. Nothing in this crate holds a reference into the
//! session coordinator; unlock requests flow out through the callback given
//! to [`InputBlocker::new`].
//!
//! ## Error model
//! Installation is binary. It either succeeds (events are being filtered) or
//! fails, most commonly because the process lacks the interception
//! permission; that is detected at install time, never assumed from a cached
//! flag. Callers must check the returned boolean.
//!
//! ## Security and privacy notes
//! Intercepted events are classified and dropped in memory; keycodes and
//! pointer positions are never logged.

use std::sync::Arc;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "macos")]
pub use macos::MacosEventTap;

/// Keys the lock policy cares about. Everything else is [`Key::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Escape, the exit-fullscreen key.
    Escape,
    /// Q, half of the conventional quit chord.
    Q,
    /// W, half of the close-window chord.
    W,
    /// H, half of the hide chord.
    H,
    /// M, half of the minimize chord.
    M,
    /// Tab, half of the application-switch chord.
    Tab,
    /// Any other key, identified by platform keycode.
    Other(u16),
}

/// Modifier keys held during a keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    /// Command (or the platform's primary chord modifier).
    pub command: bool,
    /// Option/Alt.
    pub option: bool,
    /// Control.
    pub control: bool,
    /// Shift.
    pub shift: bool,
}

impl Modifiers {
    /// No modifiers held.
    pub const NONE: Modifiers = Modifiers {
        command: false,
        option: false,
        control: false,
        shift: false,
    };

    /// Command alone.
    pub const COMMAND: Modifiers = Modifiers {
        command: true,
        option: false,
        control: false,
        shift: false,
    };
}

/// Pointer buttons distinguished by the lock policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    /// The primary (usually left) button.
    Primary,
    /// The secondary (usually right) button.
    Secondary,
}

/// One intercepted input event, reduced to what the policy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Key pressed.
    KeyDown {
        /// The key.
        key: Key,
        /// Modifiers held.
        modifiers: Modifiers,
    },
    /// Key released.
    KeyUp {
        /// The key.
        key: Key,
        /// Modifiers held.
        modifiers: Modifiers,
    },
    /// Pointer button pressed.
    PointerDown(PointerButton),
    /// Pointer button released.
    PointerUp(PointerButton),
    /// Pointer motion.
    PointerMove,
    /// Scroll wheel activity.
    Scroll,
    /// An event kind the policy does not classify.
    Other,
}

/// Policy decision for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDecision {
    /// Re-inject the event unmodified.
    PassThrough,
    /// Drop the event before it reaches any application.
    Swallow,
    /// Drop the event and trigger the re-authentication flow.
    RequestUnlock,
}

/// Disposition returned by an installed handler to the interception point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Re-inject the event unmodified.
    PassThrough,
    /// Drop the event.
    Swallow,
}

/// Owned per-event handler registered on an interceptor.
pub type EventHandler = Box<dyn Fn(&InputEvent) -> EventDisposition + Send + Sync>;

/// Classifies one event against the lock policy.
///
/// Rules are evaluated in priority order:
/// 1. The panic chord (command+option+Escape) always passes through; the OS
///    reserves it for force-quitting unresponsive applications and fighting
///    it is unreliable.
/// 2. The quit chord (command+Q) is swallowed; its key-down requests unlock
///    instead of quitting.
/// 3. Chords that hide, minimize, close, or switch away are swallowed.
/// 4. Escape is swallowed so fullscreen cannot be exited.
/// 5. Primary pointer button and pointer motion pass through so the unlock
///    control stays usable.
/// 6. Secondary pointer button and scroll are swallowed.
/// 7. All other keyboard events are swallowed.
/// 8. Unclassified event kinds pass through. Failing open here avoids
///    freezing the whole input subsystem on an unanticipated event kind.
pub fn classify_event(event: &InputEvent) -> EventDecision {
    match event {
        InputEvent::KeyDown { key, modifiers } | InputEvent::KeyUp { key, modifiers } => {
            if modifiers.command && modifiers.option && *key == Key::Escape {
                return EventDecision::PassThrough;
            }

            if modifiers.command && *key == Key::Q {
                return match event {
                    InputEvent::KeyDown { .. } => EventDecision::RequestUnlock,
                    _ => EventDecision::Swallow,
                };
            }

            if modifiers.command && matches!(key, Key::W | Key::H | Key::M | Key::Tab) {
                return EventDecision::Swallow;
            }

            if *key == Key::Escape {
                return EventDecision::Swallow;
            }

            EventDecision::Swallow
        }
        InputEvent::PointerDown(PointerButton::Primary)
        | InputEvent::PointerUp(PointerButton::Primary)
        | InputEvent::PointerMove => EventDecision::PassThrough,
        InputEvent::PointerDown(PointerButton::Secondary)
        | InputEvent::PointerUp(PointerButton::Secondary)
        | InputEvent::Scroll => EventDecision::Swallow,
        InputEvent::Other => EventDecision::PassThrough,
    }
}

/// Global interception point.
///
/// Implementations must make [`InputInterceptor::uninstall`] idempotent and
/// must detach the registered handler before returning from it, so no
/// system-wide interception can leak past teardown.
pub trait InputInterceptor: Send {
    /// Installs the interception point with the given handler.
    ///
    /// Returns `false` when installation fails (typically a missing
    /// permission, detected at install time).
    fn install(&mut self, handler: EventHandler) -> bool;

    /// Disables the interception point and drops the handler. Idempotent.
    fn uninstall(&mut self);

    /// Returns `true` while interception is active.
    fn is_installed(&self) -> bool;
}

/// Policy-applying wrapper around an [`InputInterceptor`].
///
/// Owns the unlock-request callback for the lifetime of the blocker, so
/// suspend/resume cycles re-register the same behavior.
pub struct InputBlocker {
    interceptor: Box<dyn InputInterceptor>,
    on_unlock_request: Arc<dyn Fn() + Send + Sync>,
}

impl InputBlocker {
    /// Creates a blocker over `interceptor`. `on_unlock_request` fires when a
    /// swallowed quit chord asks for re-authentication; it is invoked on the
    /// interception thread and must not block.
    pub fn new(
        interceptor: Box<dyn InputInterceptor>,
        on_unlock_request: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            interceptor,
            on_unlock_request: Arc::new(on_unlock_request),
        }
    }

    /// Attempts to install interception. Returns `false` on failure; callers
    /// must check rather than assume.
    pub fn install(&mut self) -> bool {
        if self.interceptor.is_installed() {
            return true;
        }

        let on_unlock = Arc::clone(&self.on_unlock_request);
        let handler: EventHandler = Box::new(move |event| match classify_event(event) {
            EventDecision::PassThrough => EventDisposition::PassThrough,
            EventDecision::Swallow => EventDisposition::Swallow,
            EventDecision::RequestUnlock => {
                on_unlock();
                EventDisposition::Swallow
            }
        });

        let installed = self.interceptor.install(handler);
        if installed {
            log::info!("input blocking installed");
        } else {
            log::warn!("input blocking install failed; continuing without it");
        }
        installed
    }

    /// Suspends interception so an authentication UI can receive input.
    /// Idempotent.
    pub fn suspend(&mut self) {
        if self.interceptor.is_installed() {
            log::info!("input blocking suspended");
        }
        self.interceptor.uninstall();
    }

    /// Reinstalls interception after a failed challenge.
    pub fn resume(&mut self) -> bool {
        self.install()
    }

    /// Permanently removes interception. Idempotent.
    pub fn teardown(&mut self) {
        self.interceptor.uninstall();
    }

    /// Returns `true` while events are being filtered.
    pub fn is_installed(&self) -> bool {
        self.interceptor.is_installed()
    }
}

impl Drop for InputBlocker {
    fn drop(&mut self) {
        // A blocker dropped mid-session must not leave the user's input
        // intercepted.
        self.interceptor.uninstall();
    }
}

pub use synthetic::{InterceptorProbe, SyntheticInterceptor};

mod synthetic {
    //! Deterministic interceptor for tests and permission probing.

    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{EventDisposition, EventHandler, InputEvent, InputInterceptor};

    /// Shared observer for a [`SyntheticInterceptor`].
    ///
    /// Tests keep a clone of the probe to feed events and inspect lifecycle
    /// state after handing the interceptor itself to a blocker.
    pub struct InterceptorProbe {
        handler: Mutex<Option<EventHandler>>,
        installed: AtomicBool,
        install_allowed: AtomicBool,
        install_attempts: AtomicU64,
    }

    impl InterceptorProbe {
        /// Creates a probe. `install_allowed` scripts whether installs
        /// succeed.
        pub fn new(install_allowed: bool) -> Arc<Self> {
            Arc::new(Self {
                handler: Mutex::new(None),
                installed: AtomicBool::new(false),
                install_allowed: AtomicBool::new(install_allowed),
                install_attempts: AtomicU64::new(0),
            })
        }

        /// Scripts whether future installs succeed.
        pub fn set_install_allowed(&self, allowed: bool) {
            self.install_allowed.store(allowed, Ordering::SeqCst);
        }

        /// Delivers one event to the installed handler.
        ///
        /// Events fed while nothing is installed pass through, mirroring an
        /// interception point that is not active.
        pub fn feed(&self, event: &InputEvent) -> EventDisposition {
            if let Ok(guard) = self.handler.lock() {
                if let Some(handler) = guard.as_ref() {
                    return handler(event);
                }
            }
            EventDisposition::PassThrough
        }

        /// Returns `true` while a handler is installed.
        pub fn is_installed(&self) -> bool {
            self.installed.load(Ordering::SeqCst)
        }

        /// Returns how many installs were attempted.
        pub fn install_attempts(&self) -> u64 {
            self.install_attempts.load(Ordering::SeqCst)
        }
    }

    /// Interceptor backed by an [`InterceptorProbe`].
    pub struct SyntheticInterceptor {
        probe: Arc<InterceptorProbe>,
    }

    impl SyntheticInterceptor {
        /// Creates an interceptor observed through `probe`.
        pub fn new(probe: Arc<InterceptorProbe>) -> Self {
            Self { probe }
        }
    }

    impl InputInterceptor for SyntheticInterceptor {
        fn install(&mut self, handler: EventHandler) -> bool {
            self.probe.install_attempts.fetch_add(1, Ordering::SeqCst);
            if !self.probe.install_allowed.load(Ordering::SeqCst) {
                return false;
            }

            let Ok(mut guard) = self.probe.handler.lock() else {
                return false;
            };
            *guard = Some(handler);
            self.probe.installed.store(true, Ordering::SeqCst);
            true
        }

        fn uninstall(&mut self) {
            if let Ok(mut guard) = self.probe.handler.lock() {
                *guard = None;
            }
            self.probe.installed.store(false, Ordering::SeqCst);
        }

        fn is_installed(&self) -> bool {
            self.probe.is_installed()
        }
    }
}

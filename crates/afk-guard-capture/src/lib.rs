#![warn(missing_docs)]
//! # afk-guard-capture
//!
//! ## Purpose
//! Delivers a continuous sequence of frames of one target window for the
//! duration of a lock session.
//!
//! ## Responsibilities
//! - Enumerate capturable surfaces and resolve [`WindowHandle`] targets.
//! - Run two acquisition strategies as a primary/fallback pair: a streaming
//!   path at native resolution and a lower-fidelity polling path.
//! - Arbitrate between the paths with a watchdog ([`failover`]).
//! - Provide a deterministic provider for tests and an `xcap`-backed real
//!   provider.
//!
//! ## Data flow
//! [`engine::CaptureEngine`] starts the fallback poller immediately so the
//! user sees something within one interval, starts the primary stream
//! asynchronously, and hands every delivered [`Frame`] to the consumer
//! callback as an owned value.
//!
//! ## Ownership and lifetimes
//! Providers never lend platform handles across the trait boundary; each
//! frame owns its buffer. The "primary path is live" flag is private to the
//! engine.
//!
//! ## Error model
//! A single missed poll snapshot is not an error. Startup lag and hard stream
//! stops are reported through the engine's error callback as
//! [`afk_guard_core::LockError`] values; enumeration and stream start
//! failures return [`CaptureError`].
//!
//! ## Security and privacy notes
//! Frame bytes are never logged. Window titles appear only in debug logs.

use std::sync::Arc;

use afk_guard_core::{Frame, WindowHandle};
use thiserror::Error;

pub mod engine;
pub mod failover;

mod synthetic;
mod xcap_provider;

pub use synthetic::{CaptureScript, SyntheticCaptureProvider};
pub use xcap_provider::XcapCaptureProvider;

/// Configuration for the primary streaming path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Stream width in pixels (native width scaled by display density).
    pub width: u32,
    /// Stream height in pixels.
    pub height: u32,
    /// Frame cadence.
    pub fps: u32,
    /// Whether the cursor is composited into frames. Always off for the lock
    /// mirror.
    pub include_cursor: bool,
}

impl StreamConfig {
    /// Creates a validated stream configuration.
    ///
    /// # Errors
    /// Returns [`CaptureError::InvalidFps`] when `fps == 0`.
    pub fn new(width: u32, height: u32, fps: u32) -> Result<Self, CaptureError> {
        if fps == 0 {
            return Err(CaptureError::InvalidFps);
        }

        Ok(Self {
            width: width.max(1),
            height: height.max(1),
            fps,
            include_cursor: false,
        })
    }

    /// Returns the frame interval in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        1_000 / self.fps as u64
    }
}

/// Event pushed by a running primary stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// One decoded frame arrived.
    Frame(Frame),
    /// The stream died and will deliver nothing further.
    Stopped(String),
}

/// Owned callback receiving stream events on the provider's delivery thread.
pub type StreamEventHandler = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Handle to a running primary stream.
pub trait StreamControl: Send {
    /// Cancels the stream. Must be idempotent and safe to call even if the
    /// stream already reported [`StreamEvent::Stopped`].
    fn stop(&mut self);
}

/// Backend-agnostic frame acquisition seam.
pub trait CaptureProvider: Send + Sync {
    /// Enumerates currently capturable windows.
    ///
    /// This is the ground-truth capture-permission signal: a live
    /// enumeration returning zero windows means "not granted", not "no
    /// windows exist".
    ///
    /// # Errors
    /// Returns [`CaptureError::Enumeration`] when the OS refuses the query.
    fn list_windows(&self) -> Result<Vec<WindowHandle>, CaptureError>;

    /// Synchronously snapshots one window (the polling fallback path).
    ///
    /// Returns `Ok(None)` on a transient miss; a single missed snapshot is
    /// not an error.
    ///
    /// # Errors
    /// Returns [`CaptureError::Enumeration`] when the surface list itself
    /// cannot be read.
    fn snapshot_window(&self, window_id: u64) -> Result<Option<Frame>, CaptureError>;

    /// Returns the pixel density of the display hosting the window.
    fn scale_factor(&self, window_id: u64) -> f64 {
        let _ = window_id;
        1.0
    }

    /// Starts the primary streaming path for one window.
    ///
    /// Frames and the terminal stop notice arrive through `handler` on a
    /// background delivery thread.
    ///
    /// # Errors
    /// Returns [`CaptureError::WindowNotFound`] when the target is no longer
    /// enumerable, or [`CaptureError::StreamStart`] when the stream cannot be
    /// constructed.
    fn start_stream(
        &self,
        window_id: u64,
        config: StreamConfig,
        handler: StreamEventHandler,
    ) -> Result<Box<dyn StreamControl>, CaptureError>;
}

/// Capture layer error type.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Stream fps must be positive.
    #[error("invalid fps: must be greater than zero")]
    InvalidFps,
    /// The live surface enumeration failed.
    #[error("surface enumeration failed: {0}")]
    Enumeration(String),
    /// The target window is not present in the live enumeration.
    #[error("window {0} not found in live enumeration")]
    WindowNotFound(u64),
    /// The primary stream could not be constructed.
    #[error("stream start failed: {0}")]
    StreamStart(String),
}

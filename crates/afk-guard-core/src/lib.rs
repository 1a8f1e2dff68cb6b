#![warn(missing_docs)]
//! # afk-guard-core
//!
//! ## Purpose
//! Defines the shared data model used across the `afk-guard` workspace.
//!
//! ## Responsibilities
//! - Identify capturable on-screen surfaces ([`WindowHandle`]).
//! - Represent decoded mirror frames ([`Frame`]).
//! - Represent telemetry snapshots ([`MetricsSnapshot`]).
//! - Represent permission probe results ([`PermissionState`]).
//! - Define lock session states and the session error taxonomy.
//!
//! ## Data flow
//! The capture layer resolves [`WindowHandle`] values and emits [`Frame`]
//! objects; the metrics layer emits [`MetricsSnapshot`] values; the session
//! coordinator records [`LockState`] and [`LockError`] for UI projection.
//!
//! ## Ownership and lifetimes
//! Frames and snapshots own their backing storage and transfer ownership to
//! the consumer on delivery; no shared mutable state crosses component
//! boundaries through this crate.
//!
//! ## Error model
//! Shape validation failures return [`CoreError`]. Session-level failures are
//! modeled as [`LockError`] values stored in observable state rather than
//! propagated as panics.
//!
//! ## Security and privacy notes
//! This crate never logs frame bytes. Window titles belong to third-party
//! applications and are treated as display-only data.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placement of a window in compositor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowBounds {
    /// Horizontal origin.
    pub x: f64,
    /// Vertical origin.
    pub y: f64,
    /// Width in points.
    pub width: f64,
    /// Height in points.
    pub height: f64,
}

impl WindowBounds {
    /// Returns `true` when the window is large enough to be worth mirroring.
    ///
    /// Tiny surfaces (status items, tooltips) are excluded from selection.
    pub fn is_selectable(&self) -> bool {
        self.width > 100.0 && self.height > 100.0
    }
}

/// Identifies one capturable on-screen surface.
///
/// A handle is immutable once resolved. A stale handle (window closed since
/// enumeration) must surface as [`LockError::WindowNotFound`], never be
/// silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowHandle {
    /// Opaque window id assigned by the compositor.
    pub id: u64,
    /// Display name of the owning process.
    pub owner_name: String,
    /// Window title, possibly empty.
    pub title: String,
    /// Last-known bounds at enumeration time.
    pub bounds: WindowBounds,
}

impl WindowHandle {
    /// Renders a human-readable name: `owner — title`, or owner alone when
    /// the window carries no title.
    pub fn display_name(&self) -> String {
        if self.title.is_empty() {
            self.owner_name.clone()
        } else {
            format!("{} — {}", self.owner_name, self.title)
        }
    }
}

impl PartialEq for WindowHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WindowHandle {}

impl std::hash::Hash for WindowHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One decoded mirror frame.
///
/// Ownership transfers to the consumer on delivery. No resizing or scaling
/// happens at this layer; the buffer is sized to the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw RGBA pixel buffer (`width * height * 4` bytes).
    pub rgba: Vec<u8>,
}

impl Frame {
    /// Constructs a validated frame.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidFrameShape`] when the pixel buffer length
    /// is not exactly `width * height * 4`.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, CoreError> {
        let expected = required_rgba_len(width, height)?;
        if rgba.len() != expected {
            return Err(CoreError::InvalidFrameShape {
                expected,
                actual: rgba.len(),
            });
        }

        Ok(Self {
            width,
            height,
            rgba,
        })
    }
}

/// One telemetry snapshot, recomputed every sampling tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Average CPU usage across processors, 0.0 to 100.0.
    pub cpu_percent: f64,
    /// Memory in use, bytes.
    pub memory_used_bytes: u64,
    /// Physical memory size, bytes.
    pub memory_total_bytes: u64,
    /// GPU utilization percentage; `None` when no compatible accelerator is
    /// enumerable, so UIs can hide the gauge instead of showing a false zero.
    pub gpu_percent: Option<f64>,
    /// Outbound network rate, bytes per second.
    pub net_up_bytes_per_sec: f64,
    /// Inbound network rate, bytes per second.
    pub net_down_bytes_per_sec: f64,
}

impl MetricsSnapshot {
    /// Returns an all-zero snapshot with no accelerator reading.
    pub fn empty() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_used_bytes: 0,
            memory_total_bytes: 0,
            gpu_percent: None,
            net_up_bytes_per_sec: 0.0,
            net_down_bytes_per_sec: 0.0,
        }
    }

    /// Memory usage as a percentage of physical memory; 0 when total is
    /// unknown.
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f64 / self.memory_total_bytes as f64 * 100.0
    }

    /// Renders memory usage as `used/total GB`.
    pub fn memory_display(&self) -> String {
        const GIB: f64 = 1_073_741_824.0;
        format!(
            "{:.1}/{:.0}GB",
            self.memory_used_bytes as f64 / GIB,
            self.memory_total_bytes as f64 / GIB
        )
    }

    /// Renders a byte rate as `B/s`, `KB/s`, or `MB/s`.
    pub fn format_speed(bytes_per_sec: f64) -> String {
        if bytes_per_sec < 1024.0 {
            format!("{bytes_per_sec:.0} B/s")
        } else if bytes_per_sec < 1_048_576.0 {
            format!("{:.1} KB/s", bytes_per_sec / 1024.0)
        } else {
            format!("{:.1} MB/s", bytes_per_sec / 1_048_576.0)
        }
    }
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Result of one ground-truth permission probe.
///
/// Never cached across process restarts as authoritative; every check
/// recomputes from the operating system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionState {
    /// Screen capture capability, proven by live enumeration.
    pub capture_granted: bool,
    /// Global input interception capability, proven by a probe install.
    pub input_intercept_granted: bool,
    /// Monotonically increasing probe counter, used only for log throttling.
    pub checks_performed: u64,
}

/// Lock session lifecycle states.
///
/// `Activating` and `Unlocking` are transient and must resolve back to a
/// stable state; terminal transitions loop back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    /// No session active.
    Idle,
    /// Activation sequence in progress.
    Activating,
    /// Session active, input filtered, mirror running.
    Locked,
    /// Re-authentication challenge in progress.
    Unlocking,
}

/// Capabilities validated before and during a lock session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// Permission to enumerate and capture on-screen surfaces.
    ScreenCapture,
    /// Permission to intercept input events system-wide.
    InputInterception,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::ScreenCapture => write!(f, "screen capture"),
            Capability::InputInterception => write!(f, "input interception"),
        }
    }
}

/// Session error taxonomy.
///
/// Capability and window errors abort activation; capture and input-block
/// failures during a locked session are recorded but non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LockError {
    /// Activation was requested with no window selected.
    #[error("no window selected")]
    NoWindowSelected,
    /// A required capability is not granted.
    #[error("permission denied: {0}")]
    PermissionDenied(Capability),
    /// The target window no longer exists in the live enumeration.
    #[error("target window not found")]
    WindowNotFound,
    /// The capture stream could not be started.
    #[error("capture start failed: {0}")]
    CaptureStartFailed(String),
    /// A running capture stream died or stalled.
    #[error("capture interrupted: {0}")]
    CaptureInterrupted(String),
    /// The global input interceptor could not be installed.
    #[error("input blocking unavailable")]
    InputBlockInstallFailed,
    /// The re-authentication challenge was rejected.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// No authentication facility is available on this host.
    #[error("authentication unavailable")]
    AuthUnavailable,
}

/// Error type for core model validation failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Frame buffer shape does not match declared geometry.
    #[error("invalid frame shape: expected {expected} bytes, got {actual}")]
    InvalidFrameShape {
        /// Expected RGBA byte count.
        expected: usize,
        /// Actual RGBA byte count.
        actual: usize,
    },
    /// Frame dimensions overflow addressable memory.
    #[error("frame dimensions overflow")]
    DimensionOverflow,
}

fn required_rgba_len(width: u32, height: u32) -> Result<usize, CoreError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(CoreError::DimensionOverflow)
}

#[cfg(test)]
mod tests {
    //! Unit tests for model validation and display helpers.

    use super::*;

    fn handle(id: u64, owner: &str, title: &str) -> WindowHandle {
        WindowHandle {
            id,
            owner_name: owner.to_string(),
            title: title.to_string(),
            bounds: WindowBounds {
                x: 0.0,
                y: 0.0,
                width: 800.0,
                height: 600.0,
            },
        }
    }

    #[test]
    fn frame_shape_is_validated() {
        assert!(Frame::new(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            Frame::new(2, 2, vec![0; 15]),
            Err(CoreError::InvalidFrameShape {
                expected: 16,
                actual: 15
            })
        ));
    }

    #[test]
    fn window_identity_is_the_id() {
        let a = handle(7, "Terminal", "work");
        let b = handle(7, "Terminal", "renamed");
        assert_eq!(a, b);
        assert_eq!(a.display_name(), "Terminal — work");
        assert_eq!(handle(8, "Terminal", "").display_name(), "Terminal");
    }

    #[test]
    fn tiny_windows_are_not_selectable() {
        let bounds = WindowBounds {
            x: 0.0,
            y: 0.0,
            width: 64.0,
            height: 24.0,
        };
        assert!(!bounds.is_selectable());
    }

    #[test]
    fn snapshot_display_helpers() {
        let snapshot = MetricsSnapshot {
            cpu_percent: 12.5,
            memory_used_bytes: 8 * 1_073_741_824,
            memory_total_bytes: 16 * 1_073_741_824,
            gpu_percent: None,
            net_up_bytes_per_sec: 2048.0,
            net_down_bytes_per_sec: 0.0,
        };
        assert_eq!(snapshot.memory_percent(), 50.0);
        assert_eq!(snapshot.memory_display(), "8.0/16GB");
        assert_eq!(MetricsSnapshot::format_speed(2048.0), "2.0 KB/s");
        assert_eq!(MetricsSnapshot::format_speed(512.0), "512 B/s");
        assert_eq!(MetricsSnapshot::format_speed(3_145_728.0), "3.0 MB/s");
        assert_eq!(MetricsSnapshot::empty().memory_percent(), 0.0);
    }
}

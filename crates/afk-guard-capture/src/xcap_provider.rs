//! Real capture provider backed by the `xcap` crate.
//!
//! Window handles are never cached across calls; every snapshot and stream
//! tick re-resolves the target in the live enumeration, so a closed window
//! shows up as an absence instead of a dangling platform handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use afk_guard_core::{Frame, WindowBounds, WindowHandle};
use xcap::Window;

use crate::{
    CaptureError, CaptureProvider, StreamConfig, StreamControl, StreamEvent, StreamEventHandler,
};

// Consecutive failed ticks before the stream reports a hard stop.
const STREAM_FAILURE_LIMIT: u32 = 10;

/// Capture provider over the OS compositor via `xcap`.
#[derive(Debug, Default)]
pub struct XcapCaptureProvider;

impl XcapCaptureProvider {
    /// Creates the provider.
    pub fn new() -> Self {
        Self
    }
}

impl CaptureProvider for XcapCaptureProvider {
    fn list_windows(&self) -> Result<Vec<WindowHandle>, CaptureError> {
        let windows =
            Window::all().map_err(|error| CaptureError::Enumeration(error.to_string()))?;

        let own_pid = std::process::id();
        let mut handles = Vec::new();
        for window in windows {
            let Some(handle) = resolve_handle(&window) else {
                continue;
            };
            if window.pid().map(|pid| pid == own_pid).unwrap_or(false) {
                continue;
            }
            if window.is_minimized().unwrap_or(false) {
                continue;
            }
            if handle.bounds.is_selectable() {
                handles.push(handle);
            }
        }

        Ok(handles)
    }

    fn snapshot_window(&self, window_id: u64) -> Result<Option<Frame>, CaptureError> {
        let windows =
            Window::all().map_err(|error| CaptureError::Enumeration(error.to_string()))?;
        let Some(window) = find_window(&windows, window_id) else {
            return Ok(None);
        };

        match capture_frame(window) {
            Some(frame) => Ok(Some(frame)),
            None => {
                log::debug!("snapshot of window {window_id} missed this tick");
                Ok(None)
            }
        }
    }

    fn scale_factor(&self, window_id: u64) -> f64 {
        Window::all()
            .ok()
            .as_deref()
            .and_then(|windows| find_window(windows, window_id))
            .and_then(|window| window.current_monitor().ok())
            .and_then(|monitor| monitor.scale_factor().ok())
            .map(f64::from)
            .unwrap_or(1.0)
    }

    fn start_stream(
        &self,
        window_id: u64,
        config: StreamConfig,
        handler: StreamEventHandler,
    ) -> Result<Box<dyn StreamControl>, CaptureError> {
        let windows =
            Window::all().map_err(|error| CaptureError::Enumeration(error.to_string()))?;
        if find_window(&windows, window_id).is_none() {
            return Err(CaptureError::WindowNotFound(window_id));
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let worker_stopped = Arc::clone(&stopped);
        let interval = Duration::from_millis(config.interval_ms());

        let thread = std::thread::spawn(move || {
            let mut consecutive_failures = 0_u32;
            while !worker_stopped.load(Ordering::SeqCst) {
                let frame = Window::all()
                    .ok()
                    .as_deref()
                    .and_then(|windows| find_window(windows, window_id))
                    .and_then(capture_frame);

                match frame {
                    Some(frame) => {
                        consecutive_failures = 0;
                        handler(StreamEvent::Frame(frame));
                    }
                    None => {
                        consecutive_failures += 1;
                        if consecutive_failures >= STREAM_FAILURE_LIMIT {
                            handler(StreamEvent::Stopped(format!(
                                "window {window_id} produced no frames for {consecutive_failures} consecutive ticks"
                            )));
                            return;
                        }
                    }
                }

                std::thread::sleep(interval);
            }
        });

        Ok(Box::new(XcapStreamControl {
            stopped,
            thread: Some(thread),
        }))
    }
}

struct XcapStreamControl {
    stopped: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamControl for XcapStreamControl {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for XcapStreamControl {
    fn drop(&mut self) {
        self.stop();
    }
}

fn find_window<'a>(windows: &'a [Window], window_id: u64) -> Option<&'a Window> {
    windows
        .iter()
        .find(|window| window.id().map(|id| u64::from(id) == window_id).unwrap_or(false))
}

fn resolve_handle(window: &Window) -> Option<WindowHandle> {
    let id = window.id().ok()?;
    let owner_name = window.app_name().ok()?;
    let bounds = WindowBounds {
        x: window.x().ok()? as f64,
        y: window.y().ok()? as f64,
        width: window.width().ok()? as f64,
        height: window.height().ok()? as f64,
    };

    Some(WindowHandle {
        id: u64::from(id),
        owner_name,
        title: window.title().unwrap_or_default(),
        bounds,
    })
}

fn capture_frame(window: &Window) -> Option<Frame> {
    let image = window.capture_image().ok()?;
    let (width, height) = (image.width(), image.height());
    Frame::new(width, height, image.into_raw()).ok()
}

//! Deterministic capture provider for tests.
//!
//! A [`CaptureScript`] is the shared control surface: tests keep a clone to
//! script enumeration results, make the fallback path produce or withhold
//! snapshots, and drive the primary stream by hand (deliver a frame, kill the
//! stream) while the engine under test owns the provider itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use afk_guard_core::{Frame, WindowBounds, WindowHandle};

use crate::{
    CaptureError, CaptureProvider, StreamConfig, StreamControl, StreamEvent, StreamEventHandler,
};

/// Scripted state shared between a test and a [`SyntheticCaptureProvider`].
pub struct CaptureScript {
    windows: Mutex<Vec<WindowHandle>>,
    snapshots_enabled: AtomicBool,
    enumeration_fails: AtomicBool,
    stream_start_fails: AtomicBool,
    snapshots_served: AtomicU64,
    stream_starts: AtomicU64,
    stream_generation: AtomicU64,
    active_stream: Mutex<Option<(u64, StreamEventHandler)>>,
}

impl CaptureScript {
    /// Creates a script exposing the given windows.
    pub fn with_windows(windows: Vec<WindowHandle>) -> Arc<Self> {
        Arc::new(Self {
            windows: Mutex::new(windows),
            snapshots_enabled: AtomicBool::new(true),
            enumeration_fails: AtomicBool::new(false),
            stream_start_fails: AtomicBool::new(false),
            snapshots_served: AtomicU64::new(0),
            stream_starts: AtomicU64::new(0),
            stream_generation: AtomicU64::new(0),
            active_stream: Mutex::new(None),
        })
    }

    /// Convenience constructor for a scripted window handle.
    pub fn window(id: u64, owner: &str, width: f64, height: f64) -> WindowHandle {
        WindowHandle {
            id,
            owner_name: owner.to_string(),
            title: String::new(),
            bounds: WindowBounds {
                x: 0.0,
                y: 0.0,
                width,
                height,
            },
        }
    }

    /// Replaces the enumerable window list.
    pub fn set_windows(&self, windows: Vec<WindowHandle>) {
        if let Ok(mut guard) = self.windows.lock() {
            *guard = windows;
        }
    }

    /// Scripts whether fallback snapshots produce frames.
    pub fn set_snapshots_enabled(&self, enabled: bool) {
        self.snapshots_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Scripts whether enumeration fails outright.
    pub fn set_enumeration_fails(&self, fails: bool) {
        self.enumeration_fails.store(fails, Ordering::SeqCst);
    }

    /// Scripts whether primary stream starts fail.
    pub fn set_stream_start_fails(&self, fails: bool) {
        self.stream_start_fails.store(fails, Ordering::SeqCst);
    }

    /// Number of fallback snapshots served so far.
    pub fn snapshots_served(&self) -> u64 {
        self.snapshots_served.load(Ordering::SeqCst)
    }

    /// Number of primary stream start attempts.
    pub fn stream_starts(&self) -> u64 {
        self.stream_starts.load(Ordering::SeqCst)
    }

    /// Returns `true` while a primary stream is registered.
    pub fn stream_active(&self) -> bool {
        self.active_stream
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Delivers one frame through the active primary stream, if any.
    ///
    /// Returns `false` when no stream is registered.
    pub fn push_primary_frame(&self, frame: Frame) -> bool {
        let handler = self
            .active_stream
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|(_, handler)| Arc::clone(handler)));
        match handler {
            Some(handler) => {
                handler(StreamEvent::Frame(frame));
                true
            }
            None => false,
        }
    }

    /// Kills the active primary stream with a hard stop notice.
    pub fn fail_primary(&self, detail: &str) {
        let handler = self
            .active_stream
            .lock()
            .ok()
            .and_then(|mut guard| guard.take().map(|(_, handler)| handler));
        if let Some(handler) = handler {
            handler(StreamEvent::Stopped(detail.to_string()));
        }
    }
}

/// Capture provider driven entirely by a [`CaptureScript`].
pub struct SyntheticCaptureProvider {
    script: Arc<CaptureScript>,
}

impl SyntheticCaptureProvider {
    /// Creates a provider observed and driven through `script`.
    pub fn new(script: Arc<CaptureScript>) -> Self {
        Self { script }
    }
}

impl CaptureProvider for SyntheticCaptureProvider {
    fn list_windows(&self) -> Result<Vec<WindowHandle>, CaptureError> {
        if self.script.enumeration_fails.load(Ordering::SeqCst) {
            return Err(CaptureError::Enumeration(
                "scripted enumeration failure".to_string(),
            ));
        }

        Ok(self
            .script
            .windows
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default())
    }

    fn snapshot_window(&self, window_id: u64) -> Result<Option<Frame>, CaptureError> {
        if !self.script.snapshots_enabled.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let window = self
            .script
            .windows
            .lock()
            .ok()
            .and_then(|guard| guard.iter().find(|window| window.id == window_id).cloned());
        let Some(window) = window else {
            return Ok(None);
        };

        let width = (window.bounds.width as u32).max(1);
        let height = (window.bounds.height as u32).max(1);
        let rgba = vec![0x40; width as usize * height as usize * 4];
        let frame = Frame::new(width, height, rgba)
            .map_err(|error| CaptureError::Enumeration(error.to_string()))?;

        self.script.snapshots_served.fetch_add(1, Ordering::SeqCst);
        Ok(Some(frame))
    }

    fn start_stream(
        &self,
        window_id: u64,
        _config: StreamConfig,
        handler: StreamEventHandler,
    ) -> Result<Box<dyn StreamControl>, CaptureError> {
        self.script.stream_starts.fetch_add(1, Ordering::SeqCst);
        if self.script.stream_start_fails.load(Ordering::SeqCst) {
            return Err(CaptureError::StreamStart(
                "scripted stream start failure".to_string(),
            ));
        }

        let known = self
            .script
            .windows
            .lock()
            .map(|guard| guard.iter().any(|window| window.id == window_id))
            .unwrap_or(false);
        if !known {
            return Err(CaptureError::WindowNotFound(window_id));
        }

        let generation = self.script.stream_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut guard) = self.script.active_stream.lock() {
            *guard = Some((generation, handler));
        }

        Ok(Box::new(SyntheticStreamControl {
            script: Arc::clone(&self.script),
            generation,
        }))
    }
}

struct SyntheticStreamControl {
    script: Arc<CaptureScript>,
    generation: u64,
}

impl StreamControl for SyntheticStreamControl {
    fn stop(&mut self) {
        // Only clear the registration this control created; a restarted
        // stream must survive the old control's teardown.
        if let Ok(mut guard) = self.script.active_stream.lock()
            && guard.as_ref().is_some_and(|(generation, _)| *generation == self.generation)
        {
            *guard = None;
        }
    }
}

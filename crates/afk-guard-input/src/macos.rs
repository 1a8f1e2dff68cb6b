//! Session event tap backed by Quartz Event Services.
//!
//! The tap runs on its own thread with a CFRunLoop; install success is the
//! only reliable signal that the process holds the accessibility permission,
//! so creation failure is reported to the caller instead of being guessed
//! from a cached trust flag.

use std::sync::mpsc;
use std::thread::JoinHandle;

use core_foundation::runloop::{CFRunLoop, kCFRunLoopCommonModes};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    CGEventFlags,
};

use crate::{
    EventDisposition, EventHandler, InputEvent, InputInterceptor, Key, Modifiers, PointerButton,
};

// kCGKeyboardEventKeycode
const KEYBOARD_EVENT_KEYCODE: u32 = 9;

const KEYCODE_ESCAPE: i64 = 53;
const KEYCODE_Q: i64 = 12;
const KEYCODE_W: i64 = 13;
const KEYCODE_H: i64 = 4;
const KEYCODE_M: i64 = 46;
const KEYCODE_TAB: i64 = 48;

/// CFRunLoop handle that may be stopped from another thread.
///
/// # Safety
/// `CFRunLoopStop` is documented as safe to call from any thread; the wrapper
/// only ever calls `stop`.
struct SendableRunLoop(CFRunLoop);

unsafe impl Send for SendableRunLoop {}

struct TapRuntime {
    run_loop: SendableRunLoop,
    thread: JoinHandle<()>,
}

/// Global interception point using a session-level event tap.
#[derive(Default)]
pub struct MacosEventTap {
    runtime: Option<TapRuntime>,
}

impl MacosEventTap {
    /// Creates an inactive tap.
    pub fn new() -> Self {
        Self { runtime: None }
    }
}

impl InputInterceptor for MacosEventTap {
    fn install(&mut self, handler: EventHandler) -> bool {
        if self.runtime.is_some() {
            return true;
        }

        let (ready_tx, ready_rx) = mpsc::channel::<Result<SendableRunLoop, ()>>();

        let thread = std::thread::spawn(move || {
            let events = vec![
                CGEventType::KeyDown,
                CGEventType::KeyUp,
                CGEventType::FlagsChanged,
                CGEventType::LeftMouseDown,
                CGEventType::LeftMouseUp,
                CGEventType::RightMouseDown,
                CGEventType::RightMouseUp,
                CGEventType::MouseMoved,
                CGEventType::ScrollWheel,
            ];

            let tap = CGEventTap::new(
                CGEventTapLocation::Session,
                CGEventTapPlacement::HeadInsertEventTap,
                CGEventTapOptions::Default,
                events,
                move |_proxy, event_type, event| {
                    apply_disposition(event, handler(&translate_event(event_type, event)))
                },
            );

            let tap = match tap {
                Ok(tap) => tap,
                Err(()) => {
                    let _ = ready_tx.send(Err(()));
                    return;
                }
            };

            let loop_source = match tap.mach_port.create_runloop_source(0) {
                Ok(source) => source,
                Err(_) => {
                    let _ = ready_tx.send(Err(()));
                    return;
                }
            };

            let current_loop = CFRunLoop::get_current();
            unsafe {
                current_loop.add_source(&loop_source, kCFRunLoopCommonModes);
            }
            tap.enable();

            let _ = ready_tx.send(Ok(SendableRunLoop(current_loop)));
            CFRunLoop::run_current();
        });

        match ready_rx.recv() {
            Ok(Ok(run_loop)) => {
                self.runtime = Some(TapRuntime { run_loop, thread });
                true
            }
            Ok(Err(())) | Err(_) => {
                log::warn!("event tap creation failed; accessibility permission is likely missing");
                let _ = thread.join();
                false
            }
        }
    }

    fn uninstall(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.run_loop.0.stop();
            if runtime.thread.join().is_err() {
                log::error!("event tap thread panicked during teardown");
            }
        }
    }

    fn is_installed(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Drop for MacosEventTap {
    fn drop(&mut self) {
        self.uninstall();
    }
}

/// Applies the handler's verdict to the live tap event.
///
/// The tap wrapper re-posts the original event whenever the closure yields no
/// replacement, so a swallowed event must also be neutralized in place by
/// rewriting it to a null event.
fn apply_disposition(event: &CGEvent, disposition: EventDisposition) -> Option<CGEvent> {
    match disposition {
        EventDisposition::PassThrough => Some(event.to_owned()),
        EventDisposition::Swallow => {
            event.set_type(CGEventType::Null);
            None
        }
    }
}

fn translate_event(event_type: CGEventType, event: &CGEvent) -> InputEvent {
    match event_type {
        CGEventType::KeyDown | CGEventType::KeyUp => {
            let keycode = event.get_integer_value_field(KEYBOARD_EVENT_KEYCODE);
            let flags = event.get_flags();
            let modifiers = Modifiers {
                command: flags.contains(CGEventFlags::CGEventFlagCommand),
                option: flags.contains(CGEventFlags::CGEventFlagAlternate),
                control: flags.contains(CGEventFlags::CGEventFlagControl),
                shift: flags.contains(CGEventFlags::CGEventFlagShift),
            };
            let key = key_from_code(keycode);
            if matches!(event_type, CGEventType::KeyDown) {
                InputEvent::KeyDown { key, modifiers }
            } else {
                InputEvent::KeyUp { key, modifiers }
            }
        }
        CGEventType::LeftMouseDown => InputEvent::PointerDown(PointerButton::Primary),
        CGEventType::LeftMouseUp => InputEvent::PointerUp(PointerButton::Primary),
        CGEventType::RightMouseDown => InputEvent::PointerDown(PointerButton::Secondary),
        CGEventType::RightMouseUp => InputEvent::PointerUp(PointerButton::Secondary),
        CGEventType::MouseMoved => InputEvent::PointerMove,
        CGEventType::ScrollWheel => InputEvent::Scroll,
        _ => InputEvent::Other,
    }
}

fn key_from_code(keycode: i64) -> Key {
    match keycode {
        KEYCODE_ESCAPE => Key::Escape,
        KEYCODE_Q => Key::Q,
        KEYCODE_W => Key::W,
        KEYCODE_H => Key::H,
        KEYCODE_M => Key::M,
        KEYCODE_TAB => Key::Tab,
        other => Key::Other(other as u16),
    }
}

#[cfg(test)]
mod tests {
    //! Disposition handling over synthetic Quartz events.

    use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

    use super::*;

    fn keyboard_event(keycode: u16) -> CGEvent {
        let source =
            CGEventSource::new(CGEventSourceStateID::HIDSystemState).expect("event source");
        CGEvent::new_keyboard_event(source, keycode, true).expect("keyboard event")
    }

    #[test]
    fn swallowed_events_are_neutralized_in_place() {
        let event = keyboard_event(KEYCODE_W as u16);
        let replacement = apply_disposition(&event, EventDisposition::Swallow);
        assert!(replacement.is_none());
        assert_eq!(event.get_type() as u32, CGEventType::Null as u32);
    }

    #[test]
    fn passed_events_are_returned_untouched() {
        let event = keyboard_event(KEYCODE_W as u16);
        let replacement = apply_disposition(&event, EventDisposition::PassThrough);
        assert!(replacement.is_some());
        assert_eq!(event.get_type() as u32, CGEventType::KeyDown as u32);
    }
}

//! Pure arbitration between the primary streaming path and the polling
//! fallback.
//!
//! The streaming path can silently fail to deliver frames (target behind a
//! fullscreen overlay, transient permission race, OS quirks) while the
//! polling path is heavier but near-universally reliable. The rules:
//!
//! - the fallback runs from activation until the primary proves itself live;
//! - a watchdog bounds how long startup silence goes unreported;
//! - the first primary frame retires both the watchdog and the fallback;
//! - a hard primary stop revives the fallback immediately and retries the
//!   primary.
//!
//! Keeping the rules here, away from threads and timers, makes every
//! transition deterministic under test.

/// Observation fed into the failover machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverEvent {
    /// A frame arrived from the primary stream.
    PrimaryFrame,
    /// The watchdog timer elapsed.
    WatchdogFired,
    /// The primary stream reported a hard stop.
    PrimaryStopped(String),
}

/// Side effect requested by the failover machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverCommand {
    /// Stop delivering fallback snapshots.
    StopFallback,
    /// Resume delivering fallback snapshots.
    StartFallback,
    /// Start a fresh primary stream.
    RestartPrimary,
    /// Arm the watchdog for a newly started primary stream.
    ArmWatchdog,
    /// The primary produced nothing within the watchdog window; the session
    /// continues on the fallback.
    ReportStartupLag,
    /// A live primary stream died.
    ReportInterruption(String),
}

/// Failover machine state. Private mutable state of the capture engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverState {
    primary_live: bool,
    watchdog_armed: bool,
}

impl FailoverState {
    /// Initial state: fallback covering, primary starting, watchdog armed.
    pub fn new() -> Self {
        Self {
            primary_live: false,
            watchdog_armed: true,
        }
    }

    /// Returns `true` once the primary path has delivered a frame and has
    /// not since reported a stop.
    pub fn primary_live(&self) -> bool {
        self.primary_live
    }

    /// Applies one event, returning the side effects to execute.
    pub fn apply(&mut self, event: FailoverEvent) -> Vec<FailoverCommand> {
        match event {
            FailoverEvent::PrimaryFrame => {
                if self.primary_live {
                    return Vec::new();
                }
                // The primary is strictly preferred once proven live.
                self.primary_live = true;
                self.watchdog_armed = false;
                vec![FailoverCommand::StopFallback]
            }
            FailoverEvent::WatchdogFired => {
                if !self.watchdog_armed || self.primary_live {
                    // Stale timer from a cancelled arming.
                    return Vec::new();
                }
                self.watchdog_armed = false;
                vec![FailoverCommand::ReportStartupLag]
            }
            FailoverEvent::PrimaryStopped(detail) => {
                if self.primary_live {
                    self.primary_live = false;
                    self.watchdog_armed = true;
                    vec![
                        FailoverCommand::StartFallback,
                        FailoverCommand::ReportInterruption(detail),
                        FailoverCommand::RestartPrimary,
                        FailoverCommand::ArmWatchdog,
                    ]
                } else {
                    // Died before ever going live; the fallback is already
                    // covering, so report without a retry storm.
                    self.watchdog_armed = false;
                    vec![FailoverCommand::ReportInterruption(detail)]
                }
            }
        }
    }
}

impl Default for FailoverState {
    fn default() -> Self {
        Self::new()
    }
}

#![warn(missing_docs)]
//! # afk-guard-metrics
//!
//! ## Purpose
//! Samples CPU, memory, GPU and network telemetry on a fixed interval while a
//! lock session runs, for display on the lock overlay.
//!
//! ## Responsibilities
//! - Read raw OS counters through the [`MetricsSource`] seam.
//! - Turn counter deltas into rates and percentages with pure functions.
//! - Drive a background sampling loop ([`MetricsSampler`]) that pushes
//!   [`MetricsSnapshot`] values to a consumer callback.
//!
//! ## Data flow
//! The sampler owns its source. Every tick it reads the current counters,
//! derives a snapshot against the previous tick's counters, stores the new
//! counters as the next baseline, and invokes the callback.
//!
//! ## Ownership and lifetimes
//! Counter baselines are private to the sampling loop; consumers only ever
//! see finished snapshots.
//!
//! ## Error model
//! A failed counter read is logged and skipped for that tick. Telemetry
//! degradation never escalates; a lock session survives a dead sensor.

use std::sync::Arc;
use std::time::Duration;

use afk_guard_core::MetricsSnapshot;
use thiserror::Error;

mod sampler;
mod synthetic;
mod system;

pub use sampler::{MetricsSampler, SamplerConfig};
pub use synthetic::SyntheticMetricsSource;
pub use system::SystemMetricsSource;

/// Cumulative scheduler tick counters for one logical processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    /// Ticks spent in user mode.
    pub user: u64,
    /// Ticks spent in kernel mode.
    pub system: u64,
    /// Ticks spent in user mode at reduced priority.
    pub nice: u64,
    /// Ticks spent idle.
    pub idle: u64,
}

impl CpuTicks {
    fn busy(&self) -> u64 {
        self.user + self.system + self.nice
    }

    fn total(&self) -> u64 {
        self.busy() + self.idle
    }
}

/// Point-in-time memory occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes counted as in use (resident working sets plus wired and
    /// compressed memory, per platform convention).
    pub used_bytes: u64,
    /// Physical memory size in bytes.
    pub total_bytes: u64,
}

/// Cumulative traffic counters summed over non-loopback interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkTotals {
    /// Total bytes sent since interface counters started.
    pub sent_bytes: u64,
    /// Total bytes received since interface counters started.
    pub received_bytes: u64,
}

/// Raw counter seam between the sampler and the OS.
///
/// Implementations take `&mut self` because real backends refresh internal
/// snapshots on every read.
pub trait MetricsSource: Send {
    /// Reads per-processor cumulative tick counters.
    ///
    /// # Errors
    /// Returns [`MetricsError::Read`] when the counters cannot be read.
    fn cpu_ticks(&mut self) -> Result<Vec<CpuTicks>, MetricsError>;

    /// Reads current memory occupancy.
    ///
    /// # Errors
    /// Returns [`MetricsError::Read`] when the counters cannot be read.
    fn memory(&mut self) -> Result<MemoryStats, MetricsError>;

    /// Reads GPU utilization, or `None` when no compatible accelerator is
    /// enumerable on this host.
    fn gpu_utilization(&mut self) -> Option<f64>;

    /// Reads cumulative network traffic counters.
    ///
    /// # Errors
    /// Returns [`MetricsError::Read`] when the counters cannot be read.
    fn network_totals(&mut self) -> Result<NetworkTotals, MetricsError>;
}

/// Telemetry layer error type.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// An OS counter read failed.
    #[error("counter read failed: {0}")]
    Read(String),
}

/// Average CPU usage across processors from two cumulative tick readings.
///
/// Each processor contributes its own busy-over-total ratio for the interval;
/// the result is the mean across processors, scaled to 0..=100. Processors
/// whose counters did not advance contribute zero. An empty or
/// length-mismatched baseline (first sample after start, or a processor
/// hotplug) yields `0.0` rather than a garbage spike.
pub fn cpu_usage_percent(previous: &[CpuTicks], current: &[CpuTicks]) -> f64 {
    if previous.is_empty() || previous.len() != current.len() {
        return 0.0;
    }

    let mut sum = 0.0;
    for (prev, cur) in previous.iter().zip(current) {
        let total_delta = cur.total().saturating_sub(prev.total());
        if total_delta == 0 {
            continue;
        }
        let busy_delta = cur.busy().saturating_sub(prev.busy());
        sum += busy_delta as f64 / total_delta as f64;
    }

    (sum / current.len() as f64 * 100.0).clamp(0.0, 100.0)
}

/// Bytes-per-second rate from two cumulative counter readings.
///
/// Counters that wrapped or reset (the new value is below the old one) are
/// treated as having restarted from zero, so the delta is the new value
/// itself instead of a huge unsigned underflow. A non-positive elapsed time
/// yields `0.0`.
pub fn counter_rate(previous: u64, current: u64, elapsed: Duration) -> f64 {
    let elapsed_secs = elapsed.as_secs_f64();
    if elapsed_secs <= 0.0 {
        return 0.0;
    }

    let delta = if current < previous {
        current
    } else {
        current - previous
    };
    delta as f64 / elapsed_secs
}

/// Derives a display snapshot from a current reading and the previous tick's
/// counter baselines.
pub(crate) fn derive_snapshot(
    previous_ticks: &[CpuTicks],
    current_ticks: &[CpuTicks],
    memory: MemoryStats,
    gpu_percent: Option<f64>,
    previous_net: NetworkTotals,
    current_net: NetworkTotals,
    elapsed: Duration,
) -> MetricsSnapshot {
    MetricsSnapshot {
        cpu_percent: cpu_usage_percent(previous_ticks, current_ticks),
        memory_used_bytes: memory.used_bytes,
        memory_total_bytes: memory.total_bytes,
        gpu_percent: gpu_percent.map(|value| value.clamp(0.0, 100.0)),
        net_up_bytes_per_sec: counter_rate(previous_net.sent_bytes, current_net.sent_bytes, elapsed),
        net_down_bytes_per_sec: counter_rate(
            previous_net.received_bytes,
            current_net.received_bytes,
            elapsed,
        ),
    }
}

/// Owned callback receiving snapshots on the sampling thread.
pub type SnapshotSink = Arc<dyn Fn(MetricsSnapshot) + Send + Sync>;

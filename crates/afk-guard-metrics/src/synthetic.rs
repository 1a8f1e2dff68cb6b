//! Deterministic counter source for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{CpuTicks, MemoryStats, MetricsError, MetricsSource, NetworkTotals};

/// Scripted [`MetricsSource`] returning pre-arranged counter readings.
///
/// Each read returns the current scripted value; queued readings advance the
/// script one step per read, and the last value repeats once the queue is
/// drained.
pub struct SyntheticMetricsSource {
    ticks: Mutex<Vec<CpuTicks>>,
    queued_ticks: Mutex<VecDeque<Vec<CpuTicks>>>,
    memory: Mutex<MemoryStats>,
    network: Mutex<NetworkTotals>,
    gpu: Mutex<Option<f64>>,
    cpu_fails: AtomicBool,
}

impl SyntheticMetricsSource {
    /// Creates a source with all counters at zero.
    pub fn new() -> Self {
        Self {
            ticks: Mutex::new(Vec::new()),
            queued_ticks: Mutex::new(VecDeque::new()),
            memory: Mutex::new(MemoryStats::default()),
            network: Mutex::new(NetworkTotals::default()),
            gpu: Mutex::new(None),
            cpu_fails: AtomicBool::new(false),
        }
    }

    /// Sets the tick counters returned by the next read.
    pub fn script_ticks(&self, ticks: Vec<CpuTicks>) {
        if let Ok(mut guard) = self.ticks.lock() {
            *guard = ticks;
        }
    }

    /// Queues a future tick reading, consumed one step per read.
    pub fn queue_ticks(&self, ticks: Vec<CpuTicks>) {
        if let Ok(mut guard) = self.queued_ticks.lock() {
            guard.push_back(ticks);
        }
    }

    /// Sets the scripted memory occupancy.
    pub fn script_memory(&self, memory: MemoryStats) {
        if let Ok(mut guard) = self.memory.lock() {
            *guard = memory;
        }
    }

    /// Sets the scripted cumulative network totals.
    pub fn script_network(&self, sent_bytes: u64, received_bytes: u64) {
        if let Ok(mut guard) = self.network.lock() {
            *guard = NetworkTotals {
                sent_bytes,
                received_bytes,
            };
        }
    }

    /// Sets the scripted GPU utilization reading.
    pub fn script_gpu(&self, gpu_percent: Option<f64>) {
        if let Ok(mut guard) = self.gpu.lock() {
            *guard = gpu_percent;
        }
    }

    /// Scripts whether CPU counter reads fail.
    pub fn set_cpu_fails(&self, fails: bool) {
        self.cpu_fails.store(fails, Ordering::SeqCst);
    }
}

impl Default for SyntheticMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SyntheticMetricsSource {
    fn cpu_ticks(&mut self) -> Result<Vec<CpuTicks>, MetricsError> {
        if self.cpu_fails.load(Ordering::SeqCst) {
            return Err(MetricsError::Read("scripted cpu failure".to_string()));
        }

        let mut current = self
            .ticks
            .lock()
            .map_err(|_| MetricsError::Read("poisoned script".to_string()))?;
        let reading = current.clone();
        if let Ok(mut queue) = self.queued_ticks.lock()
            && let Some(next) = queue.pop_front()
        {
            *current = next;
        }
        Ok(reading)
    }

    fn memory(&mut self) -> Result<MemoryStats, MetricsError> {
        self.memory
            .lock()
            .map(|guard| *guard)
            .map_err(|_| MetricsError::Read("poisoned script".to_string()))
    }

    fn gpu_utilization(&mut self) -> Option<f64> {
        self.gpu.lock().ok().and_then(|guard| *guard)
    }

    fn network_totals(&mut self) -> Result<NetworkTotals, MetricsError> {
        self.network
            .lock()
            .map(|guard| *guard)
            .map_err(|_| MetricsError::Read("poisoned script".to_string()))
    }
}

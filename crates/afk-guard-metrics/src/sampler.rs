//! Background sampling loop.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::{CpuTicks, MetricsSource, NetworkTotals, SnapshotSink, derive_snapshot};

/// Sampling loop tunables.
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Time between snapshots.
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

/// Periodic telemetry sampler.
///
/// Spawned by [`MetricsSampler::start`]; the loop reads counters every
/// interval, derives a snapshot against the previous tick's baselines, and
/// pushes it to the sink. The first tick has no baseline, so CPU and network
/// figures start at zero and settle on the second tick.
pub struct MetricsSampler {
    config: SamplerConfig,
    worker: Option<Worker>,
}

struct Worker {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl MetricsSampler {
    /// Creates a sampler with the default two-second interval.
    pub fn new() -> Self {
        Self::with_config(SamplerConfig::default())
    }

    /// Creates a sampler with explicit tunables.
    pub fn with_config(config: SamplerConfig) -> Self {
        Self {
            config,
            worker: None,
        }
    }

    /// Starts the sampling loop, replacing any previous run.
    ///
    /// The sink is invoked on the sampling thread, once immediately and then
    /// once per interval.
    pub fn start(&mut self, mut source: Box<dyn MetricsSource>, sink: SnapshotSink) {
        self.stop();

        let interval = self.config.interval;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::spawn(move || {
            let mut previous_ticks: Vec<CpuTicks> = Vec::new();
            let mut previous_net = NetworkTotals::default();
            let mut previous_at = Instant::now();
            let mut first_tick = true;

            loop {
                let now = Instant::now();
                let elapsed = now.duration_since(previous_at);

                let ticks = match source.cpu_ticks() {
                    Ok(ticks) => ticks,
                    Err(error) => {
                        log::warn!("cpu counter read failed, skipping tick: {error}");
                        Vec::new()
                    }
                };
                let memory = match source.memory() {
                    Ok(memory) => memory,
                    Err(error) => {
                        log::warn!("memory counter read failed: {error}");
                        Default::default()
                    }
                };
                let net = match source.network_totals() {
                    Ok(net) => net,
                    Err(error) => {
                        log::warn!("network counter read failed: {error}");
                        previous_net
                    }
                };
                let gpu = source.gpu_utilization();

                let snapshot = if first_tick {
                    // No baseline yet; rates and CPU start at zero.
                    derive_snapshot(&[], &ticks, memory, gpu, net, net, elapsed)
                } else {
                    derive_snapshot(&previous_ticks, &ticks, memory, gpu, previous_net, net, elapsed)
                };

                previous_ticks = ticks;
                previous_net = net;
                previous_at = now;
                first_tick = false;

                sink(snapshot);

                match stop_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
                }
            }
        });

        self.worker = Some(Worker {
            stop: stop_tx,
            thread,
        });
    }

    /// Stops the sampling loop. Idempotent.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            let _ = worker.thread.join();
        }
    }

    /// Returns `true` while the sampling loop is running.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Default for MetricsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MetricsSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    //! Behavioral tests for the sampling loop over a scripted source.

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use afk_guard_core::MetricsSnapshot;

    use super::*;
    use crate::MemoryStats;
    use crate::synthetic::SyntheticMetricsSource;

    fn collect_snapshots(
        source: SyntheticMetricsSource,
        count: usize,
        timeout: Duration,
    ) -> Vec<MetricsSnapshot> {
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink_snapshots = Arc::clone(&snapshots);
        let (done_tx, done_rx) = mpsc::channel();

        let mut sampler = MetricsSampler::with_config(SamplerConfig {
            interval: Duration::from_millis(10),
        });
        sampler.start(
            Box::new(source),
            Arc::new(move |snapshot| {
                let mut guard = sink_snapshots.lock().unwrap();
                guard.push(snapshot);
                if guard.len() == count {
                    let _ = done_tx.send(());
                }
            }),
        );

        done_rx.recv_timeout(timeout).expect("snapshots in time");
        sampler.stop();
        let guard = snapshots.lock().unwrap();
        guard[..count].to_vec()
    }

    #[test]
    fn first_snapshot_has_zero_rates() {
        let source = SyntheticMetricsSource::new();
        source.script_ticks(vec![CpuTicks {
            user: 500,
            system: 100,
            nice: 0,
            idle: 400,
        }]);
        source.script_network(5_000, 9_000);

        let snapshots = collect_snapshots(source, 1, Duration::from_secs(2));
        assert_eq!(snapshots[0].cpu_percent, 0.0);
        assert_eq!(snapshots[0].net_up_bytes_per_sec, 0.0);
        assert_eq!(snapshots[0].net_down_bytes_per_sec, 0.0);
    }

    #[test]
    fn second_snapshot_reflects_counter_deltas() {
        let source = SyntheticMetricsSource::new();
        source.script_ticks(vec![CpuTicks {
            user: 100,
            system: 0,
            nice: 0,
            idle: 100,
        }]);
        source.script_memory(MemoryStats {
            used_bytes: 8 << 30,
            total_bytes: 16 << 30,
        });
        source.queue_ticks(vec![CpuTicks {
            user: 150,
            system: 50,
            nice: 0,
            idle: 100,
        }]);

        let snapshots = collect_snapshots(source, 2, Duration::from_secs(2));
        // Busy delta 100 of total delta 100 on the single core.
        assert!((snapshots[1].cpu_percent - 100.0).abs() < 1e-9);
        assert_eq!(snapshots[1].memory_used_bytes, 8 << 30);
        assert_eq!(snapshots[1].memory_total_bytes, 16 << 30);
    }

    #[test]
    fn read_failures_degrade_instead_of_stopping_the_loop() {
        let source = SyntheticMetricsSource::new();
        source.set_cpu_fails(true);

        let snapshots = collect_snapshots(source, 3, Duration::from_secs(2));
        assert_eq!(snapshots.len(), 3);
        assert!(snapshots.iter().all(|s| s.cpu_percent == 0.0));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut sampler = MetricsSampler::new();
        sampler.stop();
        sampler.start(Box::new(SyntheticMetricsSource::new()), Arc::new(|_| {}));
        assert!(sampler.is_running());
        sampler.stop();
        sampler.stop();
        assert!(!sampler.is_running());
    }
}

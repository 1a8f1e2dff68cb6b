//! Live counter source backed by `sysinfo` and platform counters.

use sysinfo::{MemoryRefreshKind, Networks, RefreshKind, System};

use crate::{CpuTicks, MemoryStats, MetricsError, MetricsSource, NetworkTotals};

/// Real [`MetricsSource`] for the host system.
///
/// Memory and network counters come from `sysinfo`. CPU tick counters come
/// from the kernel's scheduler accounting where the platform exposes it
/// directly, and are synthesized from `sysinfo`'s per-processor usage
/// elsewhere so the sampler sees one counter model everywhere.
pub struct SystemMetricsSource {
    system: System,
    networks: Networks,
    #[cfg(not(target_os = "linux"))]
    accumulated: Vec<CpuTicks>,
}

impl SystemMetricsSource {
    /// Creates a source with freshly initialized counter lists.
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
            ),
            networks: Networks::new_with_refreshed_list(),
            #[cfg(not(target_os = "linux"))]
            accumulated: Vec::new(),
        }
    }
}

impl Default for SystemMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemMetricsSource {
    #[cfg(target_os = "linux")]
    fn cpu_ticks(&mut self) -> Result<Vec<CpuTicks>, MetricsError> {
        let stat = std::fs::read_to_string("/proc/stat")
            .map_err(|error| MetricsError::Read(error.to_string()))?;
        Ok(parse_proc_stat(&stat))
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_ticks(&mut self) -> Result<Vec<CpuTicks>, MetricsError> {
        // No direct tick interface; fold sysinfo's usage percentages into
        // synthetic cumulative counters, 100 ticks of advance per read.
        self.system.refresh_cpu_usage();
        let cpus = self.system.cpus();
        if self.accumulated.len() != cpus.len() {
            self.accumulated = vec![CpuTicks::default(); cpus.len()];
        }
        for (acc, cpu) in self.accumulated.iter_mut().zip(cpus) {
            let busy = cpu.cpu_usage().clamp(0.0, 100.0) as u64;
            acc.user += busy;
            acc.idle += 100 - busy;
        }
        Ok(self.accumulated.clone())
    }

    fn memory(&mut self) -> Result<MemoryStats, MetricsError> {
        self.system.refresh_memory();
        Ok(MemoryStats {
            used_bytes: self.system.used_memory(),
            total_bytes: self.system.total_memory(),
        })
    }

    fn gpu_utilization(&mut self) -> Option<f64> {
        read_gpu_busy_percent()
    }

    fn network_totals(&mut self) -> Result<NetworkTotals, MetricsError> {
        self.networks.refresh();
        let mut totals = NetworkTotals::default();
        for (name, data) in &self.networks {
            if name == "lo" || name == "lo0" {
                continue;
            }
            totals.sent_bytes += data.total_transmitted();
            totals.received_bytes += data.total_received();
        }
        Ok(totals)
    }
}

#[cfg(target_os = "linux")]
fn parse_proc_stat(stat: &str) -> Vec<CpuTicks> {
    let mut ticks = Vec::new();
    for line in stat.lines() {
        // Per-processor lines only; the aggregate "cpu " line is skipped.
        let Some(rest) = line.strip_prefix("cpu") else {
            continue;
        };
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }

        let mut fields = rest.split_whitespace().skip(1).map(str::parse::<u64>);
        let user = fields.next().and_then(Result::ok).unwrap_or(0);
        let nice = fields.next().and_then(Result::ok).unwrap_or(0);
        let system = fields.next().and_then(Result::ok).unwrap_or(0);
        let idle = fields.next().and_then(Result::ok).unwrap_or(0);
        ticks.push(CpuTicks {
            user,
            system,
            nice,
            idle,
        });
    }
    ticks
}

/// Reads GPU utilization from the first accelerator exposing a busy counter,
/// or `None` when no such device exists so consumers can hide the gauge.
#[cfg(target_os = "linux")]
fn read_gpu_busy_percent() -> Option<f64> {
    let entries = std::fs::read_dir("/sys/class/drm").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("card") || name.contains('-') {
            continue;
        }
        let busy_path = entry.path().join("device/gpu_busy_percent");
        if let Ok(raw) = std::fs::read_to_string(&busy_path)
            && let Ok(value) = raw.trim().parse::<f64>()
        {
            return Some(value.clamp(0.0, 100.0));
        }
    }
    None
}

#[cfg(target_os = "macos")]
fn read_gpu_busy_percent() -> Option<f64> {
    macos_gpu::accelerator_utilization()
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn read_gpu_busy_percent() -> Option<f64> {
    None
}

#[cfg(target_os = "macos")]
mod macos_gpu {
    //! Accelerator utilization via the IOKit registry.
    //!
    //! Walks the `IOAccelerator` services and reads the device utilization
    //! figure from their `PerformanceStatistics` dictionary. Hosts without an
    //! enumerable accelerator yield `None` so consumers can hide the gauge.

    use std::ffi::{c_char, c_void};

    use core_foundation::base::{CFAllocatorRef, TCFType, kCFAllocatorDefault};
    use core_foundation::dictionary::{
        CFDictionary, CFDictionaryGetValueIfPresent, CFDictionaryRef, CFMutableDictionaryRef,
    };
    use core_foundation::number::{CFNumber, CFNumberRef};
    use core_foundation::string::CFString;

    #[allow(non_camel_case_types)]
    type mach_port_t = u32;
    #[allow(non_camel_case_types)]
    type io_object_t = mach_port_t;
    #[allow(non_camel_case_types)]
    type io_iterator_t = io_object_t;
    #[allow(non_camel_case_types)]
    type kern_return_t = i32;

    const KERN_SUCCESS: kern_return_t = 0;
    // kIOMasterPortDefault
    const MASTER_PORT_DEFAULT: mach_port_t = 0;

    #[link(name = "IOKit", kind = "framework")]
    unsafe extern "C" {
        fn IOServiceMatching(name: *const c_char) -> CFMutableDictionaryRef;
        fn IOServiceGetMatchingServices(
            master_port: mach_port_t,
            matching: CFMutableDictionaryRef,
            existing: *mut io_iterator_t,
        ) -> kern_return_t;
        fn IOIteratorNext(iterator: io_iterator_t) -> io_object_t;
        fn IOObjectRelease(object: io_object_t) -> kern_return_t;
        fn IORegistryEntryCreateCFProperties(
            entry: io_object_t,
            properties: *mut CFMutableDictionaryRef,
            allocator: CFAllocatorRef,
            options: u32,
        ) -> kern_return_t;
    }

    /// Returns the first accelerator's device utilization, clamped to
    /// 0..=100.
    pub fn accelerator_utilization() -> Option<f64> {
        let matching = unsafe { IOServiceMatching(c"IOAccelerator".as_ptr()) };
        if matching.is_null() {
            return None;
        }

        // The matching dictionary is consumed by the lookup.
        let mut iterator: io_iterator_t = 0;
        let kr =
            unsafe { IOServiceGetMatchingServices(MASTER_PORT_DEFAULT, matching, &mut iterator) };
        if kr != KERN_SUCCESS {
            return None;
        }

        let mut utilization = None;
        loop {
            let service = unsafe { IOIteratorNext(iterator) };
            if service == 0 {
                break;
            }
            if utilization.is_none() {
                utilization = service_utilization(service);
            }
            unsafe { IOObjectRelease(service) };
        }
        unsafe { IOObjectRelease(iterator) };
        utilization
    }

    fn service_utilization(service: io_object_t) -> Option<f64> {
        let mut properties: CFMutableDictionaryRef = std::ptr::null_mut();
        let kr = unsafe {
            IORegistryEntryCreateCFProperties(service, &mut properties, kCFAllocatorDefault, 0)
        };
        if kr != KERN_SUCCESS || properties.is_null() {
            return None;
        }
        let properties = unsafe {
            CFDictionary::<*const c_void, *const c_void>::wrap_under_create_rule(
                properties as CFDictionaryRef,
            )
        };

        let stats =
            dict_value(properties.as_concrete_TypeRef(), "PerformanceStatistics")? as CFDictionaryRef;
        let value = dict_value(stats, "Device Utilization %")?;
        let number = unsafe { CFNumber::wrap_under_get_rule(value as CFNumberRef) };
        number.to_f64().map(|value| value.clamp(0.0, 100.0))
    }

    fn dict_value(dict: CFDictionaryRef, key: &str) -> Option<*const c_void> {
        let key = CFString::new(key);
        let mut value: *const c_void = std::ptr::null();
        let present = unsafe {
            CFDictionaryGetValueIfPresent(dict, key.as_concrete_TypeRef() as *const c_void, &mut value)
        };
        (present != 0 && !value.is_null()).then_some(value)
    }
}


#[cfg(all(test, target_os = "linux"))]
mod tests {
    //! Unit tests for the /proc/stat parser.

    use super::*;

    #[test]
    fn parses_per_processor_lines_and_skips_aggregate() {
        let stat = "cpu  800 20 300 5000 40 0 10 0 0 0\n\
                    cpu0 500 10 200 2500 20 0 5 0 0 0\n\
                    cpu1 300 10 100 2500 20 0 5 0 0 0\n\
                    intr 12345\n";
        let ticks = parse_proc_stat(stat);
        assert_eq!(ticks.len(), 2);
        assert_eq!(
            ticks[0],
            CpuTicks {
                user: 500,
                nice: 10,
                system: 200,
                idle: 2500,
            }
        );
        assert_eq!(ticks[1].busy(), 410);
    }

    #[test]
    fn tolerates_truncated_lines() {
        let ticks = parse_proc_stat("cpu0 100 0\n");
        assert_eq!(
            ticks,
            vec![CpuTicks {
                user: 100,
                nice: 0,
                system: 0,
                idle: 0,
            }]
        );
    }
}

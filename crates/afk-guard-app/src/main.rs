#![warn(missing_docs)]
//! # afk-guard binary
//!
//! Command-line shell around the lock coordinator. Subcommands:
//!
//! - `windows [--json]` lists selectable windows
//! - `permissions` probes the capture and input-interception capabilities
//! - `metrics [seconds]` prints telemetry snapshots for a while
//! - `lock <window-id>` runs a lock session against a real window

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use afk_guard_app::{LockCoordinator, app_version};
use afk_guard_auth::{AuthChallenge, AuthVerdict};
use afk_guard_capture::{CaptureProvider, XcapCaptureProvider};
use afk_guard_core::{LockState, MetricsSnapshot};
use afk_guard_metrics::{MetricsSampler, SystemMetricsSource};
use afk_guard_permissions::PermissionValidator;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("windows") => cmd_windows(args.iter().any(|a| a == "--json")),
        Some("permissions") => cmd_permissions(),
        Some("metrics") => cmd_metrics(parse_seconds(args.get(1))),
        Some("lock") => match args.get(1).and_then(|raw| raw.parse::<u64>().ok()) {
            Some(window_id) => cmd_lock(window_id),
            None => Err("lock requires a numeric window id".to_string()),
        },
        Some("--version") => {
            println!("afk-guard {}", app_version());
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("afk-guard {}", app_version());
    println!();
    println!("usage: afk-guard <command>");
    println!("  windows [--json]   list selectable windows");
    println!("  permissions        probe capture and input-interception capabilities");
    println!("  metrics [seconds]  print telemetry snapshots (default 10s)");
    println!("  lock <window-id>   lock the screen mirroring the given window");
}

fn parse_seconds(raw: Option<&String>) -> u64 {
    raw.and_then(|value| value.parse::<u64>().ok()).unwrap_or(10)
}

fn cmd_windows(as_json: bool) -> Result<(), String> {
    let provider = XcapCaptureProvider::new();
    let windows = provider
        .list_windows()
        .map_err(|error| error.to_string())?;

    if as_json {
        let rendered =
            serde_json::to_string_pretty(&windows).map_err(|error| error.to_string())?;
        println!("{rendered}");
        return Ok(());
    }

    if windows.is_empty() {
        println!("no selectable windows (is screen capture permission granted?)");
        return Ok(());
    }
    for window in &windows {
        println!(
            "{:>10}  {:>4}x{:<4}  {}",
            window.id, window.bounds.width as u32, window.bounds.height as u32,
            window.display_name()
        );
    }
    Ok(())
}

fn cmd_permissions() -> Result<(), String> {
    let provider = XcapCaptureProvider::new();
    let mut validator = PermissionValidator::new();

    let capture = validator.check_capture(&provider);
    println!("screen capture:     {}", verdict_label(capture));

    #[cfg(target_os = "macos")]
    {
        let mut interceptor = afk_guard_input::MacosEventTap::new();
        let input = validator.check_input_interception(&mut interceptor);
        println!("input interception: {}", verdict_label(input));
    }
    #[cfg(not(target_os = "macos"))]
    println!("input interception: unsupported on this platform");

    Ok(())
}

fn verdict_label(granted: bool) -> &'static str {
    if granted { "granted" } else { "NOT granted" }
}

fn cmd_metrics(seconds: u64) -> Result<(), String> {
    let mut sampler = MetricsSampler::new();
    sampler.start(
        Box::new(SystemMetricsSource::new()),
        Arc::new(|snapshot| println!("{}", render_metrics(&snapshot))),
    );
    std::thread::sleep(Duration::from_secs(seconds));
    sampler.stop();
    Ok(())
}

fn render_metrics(snapshot: &MetricsSnapshot) -> String {
    let gpu = snapshot
        .gpu_percent
        .map(|value| format!("{value:.0}%"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "cpu {:5.1}%  mem {}  gpu {}  up {}  down {}",
        snapshot.cpu_percent,
        snapshot.memory_display(),
        gpu,
        MetricsSnapshot::format_speed(snapshot.net_up_bytes_per_sec),
        MetricsSnapshot::format_speed(snapshot.net_down_bytes_per_sec),
    )
}

/// Interactive challenge for the demo shell: the session ends only when the
/// user types `yes` at the prompt.
struct ConsoleChallenge;

impl AuthChallenge for ConsoleChallenge {
    fn challenge(&self) -> AuthVerdict {
        println!("re-authentication required: type 'yes' to unlock");
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => AuthVerdict::Unavailable,
            Ok(_) if line.trim().eq_ignore_ascii_case("yes") => AuthVerdict::Granted,
            Ok(_) => AuthVerdict::Denied,
        }
    }
}

fn cmd_lock(window_id: u64) -> Result<(), String> {
    let provider: Arc<dyn CaptureProvider> = Arc::new(XcapCaptureProvider::new());

    #[cfg(target_os = "macos")]
    let interceptor: Box<dyn afk_guard_input::InputInterceptor> =
        Box::new(afk_guard_input::MacosEventTap::new());
    #[cfg(not(target_os = "macos"))]
    let interceptor: Box<dyn afk_guard_input::InputInterceptor> = {
        println!("note: input interception is unsupported here; running capture-only");
        Box::new(afk_guard_input::SyntheticInterceptor::new(
            afk_guard_input::InterceptorProbe::new(false),
        ))
    };

    let mut coordinator = LockCoordinator::new(
        provider,
        interceptor,
        Arc::new(ConsoleChallenge),
        Box::new(|| Box::new(SystemMetricsSource::new())),
    );

    let windows = coordinator
        .available_windows()
        .map_err(|error| error.to_string())?;
    let target = windows
        .iter()
        .find(|window| window.id == window_id)
        .cloned()
        .ok_or_else(|| format!("window {window_id} is not selectable"))?;
    println!("locking onto {}", target.display_name());
    coordinator.select_window(target);

    coordinator.activate().map_err(|error| error.to_string())?;
    if let Some(error) = coordinator.lock_error() {
        println!("session degraded: {error}");
    }

    // Session loop: show status once a second and service unlock requests
    // posted by the quit chord.
    while coordinator.state() != LockState::Idle {
        std::thread::sleep(Duration::from_secs(1));

        if coordinator.try_recv_unlock_request() && coordinator.request_unlock() {
            break;
        }
        if let Some(error) = coordinator.capture_error() {
            println!("capture: {error}");
        }
        let frame_status = coordinator
            .latest_frame()
            .map(|frame| format!("{}x{}", frame.width, frame.height))
            .unwrap_or_else(|| "waiting".to_string());
        println!(
            "locked | mirror {} | primary_live={} | {}",
            frame_status,
            coordinator.primary_capture_live(),
            render_metrics(&coordinator.latest_metrics()),
        );
    }

    coordinator.force_exit();
    println!("unlocked");
    Ok(())
}

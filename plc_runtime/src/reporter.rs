//! Periodic statistics reporter.
//!
//! Optional thread that logs a timing snapshot at a configured interval.
//! Disabled when the interval is zero.

use crate::stats::ScanStats;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

/// Spawn the reporter thread.
///
/// Sleeps in one-second steps so the stop flag is observed promptly.
///
/// # Errors
/// Thread spawn failure only.
pub fn spawn_reporter(
    stats: Arc<ScanStats>,
    interval_secs: u64,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("plc-stats-reporter".to_string())
        .spawn(move || {
            let mut elapsed = 0u64;
            while running.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_secs(1));
                elapsed += 1;
                if elapsed < interval_secs {
                    continue;
                }
                elapsed = 0;

                let snap = stats.snapshot();
                info!(
                    "scan stats: {} cycle(s), scan avg={}us max={}us, latency max={}us, overruns={}",
                    snap.scan_count,
                    snap.scan_time_avg_us.unwrap_or(0),
                    snap.scan_time_max_us.unwrap_or(0),
                    snap.latency_max_us.unwrap_or(0),
                    snap.overruns,
                );
            }
        })
}

//! The scan cycle hot path.
//!
//! A fixed-period, deadline-driven loop: absolute-time sleep on
//! `CLOCK_MONOTONIC` keeps phase with the ideal schedule, per-cycle
//! statistics go through the stats mutex, and the cycle body runs under
//! the priority-inheriting image-table mutex in the order
//! `cycle_start` hooks → `config_run(tick++)` → `update_time` →
//! heartbeat → `cycle_end` hooks.
//!
//! The hot path does no allocation, no recovery and no user-visible error
//! surfacing; its failures become statistics (overruns) or watchdog
//! trips.
//!
//! ## RT setup
//!
//! Before the first cycle the thread attempts to elevate itself:
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` — lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setscheduler(SCHED_FIFO, priority)` — mid-range RT priority.
//!
//! Failures are logged, not fatal: the loop also runs (with degraded
//! jitter) on kernels and in containers without RT privileges.

use crate::lifecycle::StateCell;
use crate::loader::ProgramHandle;
use crate::stats::ScanStats;
use plc_common::consts::DEFAULT_TICKTIME_NS;
use plc_common::state::RuntimeState;
use plc_common::time::{now_monotonic, sleep_until, timespec_add_ns, timespec_diff};
use plc_drivers::PluginHost;
use plc_image::SharedImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// The scan engine; owns one run of the loop on a dedicated thread.
pub struct ScanEngine {
    pub state: Arc<StateCell>,
    pub program: Arc<ProgramHandle>,
    pub image: Arc<SharedImage>,
    pub host: Arc<PluginHost>,
    pub stats: Arc<ScanStats>,
    /// Wall-clock seconds, stored once per cycle for the watchdog.
    pub heartbeat: Arc<AtomicU64>,
    /// Cycle counter passed to `config_run`.
    pub tick: Arc<AtomicU64>,
    pub rt_priority: i32,
}

impl ScanEngine {
    /// Run cycles until the lifecycle leaves `RUNNING`.
    pub fn run(self) {
        elevate_realtime(self.rt_priority);

        info!(
            "scan engine started (period {} ns)",
            self.effective_period_ns()
        );

        let mut first = true;
        let mut last_start = now_monotonic();
        let mut expected_start = last_start;

        while self.state.get() == RuntimeState::Running {
            // Re-read each cycle: a running program may update its period.
            let period_ns = self.effective_period_ns() as i64;

            if first {
                let now = now_monotonic();
                last_start = now;
                expected_start = timespec_add_ns(now, period_ns);
                self.stats.seed_cycle();
                self.cycle_body();
                first = false;
                sleep_until(expected_start);
                continue;
            }

            let now = now_monotonic();
            let cycle_ns = timespec_diff(now, last_start);
            let latency_ns = timespec_diff(now, expected_start);
            last_start = now;
            expected_start = timespec_add_ns(expected_start, period_ns);
            self.stats.record_cycle(cycle_ns, latency_ns);

            let body_start = now_monotonic();
            self.cycle_body();
            let after = now_monotonic();

            let scan_ns = timespec_diff(after, body_start);
            let overrun = timespec_diff(after, expected_start) > 0;
            self.stats.record_scan(scan_ns, overrun);

            sleep_until(expected_start);
        }

        info!(
            "scan engine stopped after {} cycle(s)",
            self.stats.snapshot().scan_count
        );
    }

    fn effective_period_ns(&self) -> u64 {
        match self.program.ticktime_ns() {
            0 => DEFAULT_TICKTIME_NS,
            t => t,
        }
    }

    /// One cycle body under the image-table mutex.
    fn cycle_body(&self) {
        let _image = self.image.lock();
        self.host.cycle_start();
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        self.program.config_run(tick as u32);
        self.program.update_time();
        self.heartbeat.store(epoch_secs(), Ordering::Relaxed);
        self.host.cycle_end();
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ─── RT setup ───────────────────────────────────────────────────────

/// Best-effort elevation to real-time scheduling.
fn elevate_realtime(priority: i32) {
    #[cfg(target_os = "linux")]
    {
        use nix::sys::mman::{mlockall, MlockAllFlags};
        if let Err(e) = mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
            warn!("mlockall failed: {e} (continuing without locked pages)");
        }
    }

    prefault_stack();

    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: plain syscall on the current thread.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        warn!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {} (continuing non-RT)",
            std::io::Error::last_os_error()
        );
    }
}

/// Touch a stack region so the pages are resident before the loop starts.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: in-bounds volatile store, kept so the loop is not
        // optimized away.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_secs_is_sane() {
        // After 2020-01-01 and monotone across two reads.
        let a = epoch_secs();
        let b = epoch_secs();
        assert!(a > 1_577_836_800);
        assert!(b >= a);
    }

    #[test]
    fn prefault_does_not_smash_anything() {
        prefault_stack();
    }
}

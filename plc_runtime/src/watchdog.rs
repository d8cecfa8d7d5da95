//! Heartbeat liveness monitoring.
//!
//! The scan engine stores wall-clock seconds into an atomic once per
//! cycle. The watchdog thread wakes every two seconds and compares the
//! value against its previous observation: an unchanged heartbeat while
//! the lifecycle is `RUNNING` means the scan loop (or something it waits
//! on) is stuck, and recovering a frozen real-time loop in-process is not
//! reliably safe. The process exits non-zero so a supervisor can restart
//! it.
//!
//! The fatal path writes to standard error with a raw `write(2)`,
//! bypassing the structured logger: if the logger's transport is what
//! wedged the scan thread, going through it would deadlock the last
//! words.

use crate::lifecycle::StateCell;
use plc_common::consts::WATCHDOG_EXIT_CODE;
use plc_common::state::RuntimeState;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

/// Stall decision: unchanged heartbeat while `RUNNING`.
///
/// `prev` is `None` on the first observation, which always defers — the
/// watchdog grants one full period of grace after startup.
pub fn heartbeat_stalled(prev: Option<u64>, current: u64, state: RuntimeState) -> bool {
    state == RuntimeState::Running && prev == Some(current)
}

/// The watchdog thread configuration.
pub struct Watchdog {
    pub heartbeat: Arc<AtomicU64>,
    pub state: Arc<StateCell>,
    pub running: Arc<AtomicBool>,
    pub period: Duration,
}

impl Watchdog {
    /// Spawn the monitor thread.
    ///
    /// # Errors
    /// Thread spawn failure only.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("plc-watchdog".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        info!("watchdog armed (period {:?})", self.period);
        let mut prev: Option<u64> = None;

        while self.running.load(Ordering::Relaxed) {
            std::thread::sleep(self.period);
            let current = self.heartbeat.load(Ordering::Relaxed);

            if heartbeat_stalled(prev, current, self.state.get()) {
                fatal_stall();
            }
            prev = Some(current);
        }
    }
}

/// Last words to stderr, then terminate the process.
fn fatal_stall() -> ! {
    const MSG: &[u8] =
        b"plc_runtime: watchdog: heartbeat stalled while RUNNING, terminating\n";
    // SAFETY: plain write(2) on stderr with a static buffer.
    unsafe {
        libc::write(libc::STDERR_FILENO, MSG.as_ptr().cast(), MSG.len());
    }
    std::process::exit(WATCHDOG_EXIT_CODE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_always_defers() {
        assert!(!heartbeat_stalled(None, 42, RuntimeState::Running));
    }

    #[test]
    fn stall_requires_running_state() {
        assert!(!heartbeat_stalled(Some(42), 42, RuntimeState::Stopped));
        assert!(!heartbeat_stalled(Some(42), 42, RuntimeState::Empty));
        assert!(!heartbeat_stalled(Some(42), 42, RuntimeState::Error));
        assert!(heartbeat_stalled(Some(42), 42, RuntimeState::Running));
    }

    #[test]
    fn advancing_heartbeat_never_stalls() {
        assert!(!heartbeat_stalled(Some(42), 43, RuntimeState::Running));
    }
}

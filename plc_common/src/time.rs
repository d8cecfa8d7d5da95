//! Monotonic clock and absolute-deadline sleep.
//!
//! The scan engine paces itself with `clock_nanosleep(TIMER_ABSTIME)` on
//! `CLOCK_MONOTONIC`, so repeated sleeps do not accumulate drift. The
//! helpers here keep all second/nanosecond carry handling in one place.
//!
//! These primitives do not fail visibly: on a clock error they return the
//! best-available time (zero in the degenerate case) rather than an error,
//! since the hot path has no recovery story for a broken clock.

use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Current point on `CLOCK_MONOTONIC`.
///
/// `CLOCK_MONOTONIC_RAW` is not a valid `clock_nanosleep` clock, and
/// [`sleep_until`] must observe the same timeline, so both sides use the
/// adjustable monotonic clock.
#[inline]
pub fn now_monotonic() -> TimeSpec {
    clock_gettime(ClockId::CLOCK_MONOTONIC).unwrap_or_else(|_| TimeSpec::new(0, 0))
}

/// Block until `deadline` on `CLOCK_MONOTONIC`.
///
/// Absolute-deadline primitive: a sequence of `sleep_until(t0 + n*T)` calls
/// keeps phase with the ideal schedule regardless of how long each cycle
/// body ran. Interrupted sleeps are retried against the same deadline.
pub fn sleep_until(deadline: TimeSpec) {
    use nix::time::{clock_nanosleep, ClockNanosleepFlags};

    loop {
        match clock_nanosleep(
            ClockId::CLOCK_MONOTONIC,
            ClockNanosleepFlags::TIMER_ABSTIME,
            &deadline,
        ) {
            Ok(_) => return,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return,
        }
    }
}

/// Difference `a - b` in nanoseconds. Negative when `b > a`.
#[inline]
pub fn timespec_diff(a: TimeSpec, b: TimeSpec) -> i64 {
    let mut sec = a.tv_sec() - b.tv_sec();
    let mut nsec = a.tv_nsec() - b.tv_nsec();
    if nsec < 0 {
        // Borrow from seconds.
        sec -= 1;
        nsec += NANOS_PER_SEC;
    }
    sec * NANOS_PER_SEC + nsec
}

/// Add nanoseconds to a timespec, normalizing the result.
#[inline]
pub fn timespec_add_ns(ts: TimeSpec, ns: i64) -> TimeSpec {
    timespec_normalize(TimeSpec::new(ts.tv_sec(), ts.tv_nsec() + ns))
}

/// Normalize so that `0 <= tv_nsec < 1_000_000_000`.
pub fn timespec_normalize(ts: TimeSpec) -> TimeSpec {
    let mut sec = ts.tv_sec();
    let mut nsec = ts.tv_nsec();
    while nsec >= NANOS_PER_SEC {
        sec += 1;
        nsec -= NANOS_PER_SEC;
    }
    while nsec < 0 {
        sec -= 1;
        nsec += NANOS_PER_SEC;
    }
    TimeSpec::new(sec, nsec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_borrows_from_seconds() {
        let a = TimeSpec::new(2, 100);
        let b = TimeSpec::new(1, 900_000_000);
        assert_eq!(timespec_diff(a, b), 100_000_100);
    }

    #[test]
    fn diff_is_signed() {
        let a = TimeSpec::new(1, 0);
        let b = TimeSpec::new(2, 500_000_000);
        assert_eq!(timespec_diff(a, b), -1_500_000_000);
    }

    #[test]
    fn add_carries_into_seconds() {
        let ts = TimeSpec::new(5, 900_000_000);
        let sum = timespec_add_ns(ts, 200_000_000);
        assert_eq!(sum.tv_sec(), 6);
        assert_eq!(sum.tv_nsec(), 100_000_000);
    }

    #[test]
    fn normalize_negative_nanos() {
        let ts = timespec_normalize(TimeSpec::new(3, -250_000_000));
        assert_eq!(ts.tv_sec(), 2);
        assert_eq!(ts.tv_nsec(), 750_000_000);
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = now_monotonic();
        let b = now_monotonic();
        assert!(timespec_diff(b, a) >= 0);
    }
}

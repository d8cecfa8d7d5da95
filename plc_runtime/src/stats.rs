//! Per-cycle timing statistics.
//!
//! Updated O(1) by the scan thread under a dedicated mutex; any thread may
//! snapshot. Three channels are tracked: scan time (program execution
//! duration), cycle time (start-to-next-start) and cycle latency (actual
//! start minus expected start, signed). The first cycle only seeds the
//! baselines; no timing sample is recorded for it.

use parking_lot::Mutex;
use serde::Serialize;

/// One min/max/running-mean channel, in nanoseconds.
#[derive(Debug, Clone, Copy)]
struct Channel {
    count: u64,
    min_ns: i64,
    max_ns: i64,
    mean_ns: f64,
}

impl Channel {
    const fn new() -> Self {
        // Infinity sentinels: any first sample replaces both bounds.
        Self {
            count: 0,
            min_ns: i64::MAX,
            max_ns: i64::MIN,
            mean_ns: 0.0,
        }
    }

    /// Record a sample. O(1), no allocation.
    #[inline]
    fn record(&mut self, v: i64) {
        self.count += 1;
        if v < self.min_ns {
            self.min_ns = v;
        }
        if v > self.max_ns {
            self.max_ns = v;
        }
        self.mean_ns += (v as f64 - self.mean_ns) / self.count as f64;
    }

    /// Whole-microsecond (min, avg, max); `None`s before the first sample.
    fn snapshot_us(&self) -> (Option<i64>, Option<i64>, Option<i64>) {
        if self.count == 0 {
            return (None, None, None);
        }
        (
            Some(self.min_ns / 1_000),
            Some((self.mean_ns / 1_000.0).round() as i64),
            Some(self.max_ns / 1_000),
        )
    }
}

/// The raw statistics record. Only the scan thread writes.
#[derive(Debug)]
struct TimingStats {
    scan_count: u64,
    overruns: u64,
    scan: Channel,
    cycle: Channel,
    latency: Channel,
}

impl TimingStats {
    const fn new() -> Self {
        Self {
            scan_count: 0,
            overruns: 0,
            scan: Channel::new(),
            cycle: Channel::new(),
            latency: Channel::new(),
        }
    }
}

/// Shared statistics handle: a [`TimingStats`] behind its dedicated mutex.
pub struct ScanStats {
    inner: Mutex<TimingStats>,
}

impl ScanStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TimingStats::new()),
        }
    }

    /// First cycle: count it, record nothing else.
    pub fn seed_cycle(&self) {
        self.inner.lock().scan_count += 1;
    }

    /// Subsequent cycle start: count it and record cycle time + latency.
    pub fn record_cycle(&self, cycle_ns: i64, latency_ns: i64) {
        let mut s = self.inner.lock();
        s.scan_count += 1;
        s.cycle.record(cycle_ns);
        s.latency.record(latency_ns);
    }

    /// End of the cycle body: record scan time and a possible overrun.
    pub fn record_scan(&self, scan_ns: i64, overrun: bool) {
        let mut s = self.inner.lock();
        s.scan.record(scan_ns);
        if overrun {
            s.overruns += 1;
        }
    }

    /// Consistent snapshot for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        let s = self.inner.lock();
        let (scan_time_min_us, scan_time_avg_us, scan_time_max_us) = s.scan.snapshot_us();
        let (cycle_time_min_us, cycle_time_avg_us, cycle_time_max_us) =
            s.cycle.snapshot_us();
        let (latency_min_us, latency_avg_us, latency_max_us) = s.latency.snapshot_us();

        StatsSnapshot {
            scan_count: s.scan_count,
            overruns: s.overruns,
            scan_time_min_us,
            scan_time_avg_us,
            scan_time_max_us,
            cycle_time_min_us,
            cycle_time_avg_us,
            cycle_time_max_us,
            latency_min_us,
            latency_avg_us,
            latency_max_us,
        }
    }
}

impl Default for ScanStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot serialized into the `STATS:` response.
///
/// Timing fields are whole microseconds; all of them are `null` until a
/// cycle after the first has completed.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub scan_count: u64,
    pub overruns: u64,
    pub scan_time_min_us: Option<i64>,
    pub scan_time_avg_us: Option<i64>,
    pub scan_time_max_us: Option<i64>,
    pub cycle_time_min_us: Option<i64>,
    pub cycle_time_avg_us: Option<i64>,
    pub cycle_time_max_us: Option<i64>,
    pub latency_min_us: Option<i64>,
    pub latency_avg_us: Option<i64>,
    pub latency_max_us: Option<i64>,
}

impl StatsSnapshot {
    /// One-line JSON for the control protocol.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_is_all_null() {
        let stats = ScanStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.scan_count, 0);
        assert_eq!(snap.overruns, 0);
        assert!(snap.scan_time_min_us.is_none());
        assert!(snap.cycle_time_avg_us.is_none());
        assert!(snap.latency_max_us.is_none());

        let json = snap.to_json();
        assert!(json.contains("\"scan_count\":0"));
        assert!(json.contains("\"overruns\":0"));
        assert!(json.contains("\"scan_time_min_us\":null"));
    }

    #[test]
    fn seed_counts_without_samples() {
        let stats = ScanStats::new();
        stats.seed_cycle();
        let snap = stats.snapshot();
        assert_eq!(snap.scan_count, 1);
        assert!(snap.cycle_time_min_us.is_none());
    }

    #[test]
    fn min_avg_max_are_ordered() {
        let stats = ScanStats::new();
        stats.seed_cycle();
        for (cycle, latency, scan) in [
            (1_000_000, 5_000, 400_000),
            (1_050_000, -2_000, 380_000),
            (990_000, 11_000, 500_000),
            (1_200_000, 7_000, 450_000),
        ] {
            stats.record_cycle(cycle, latency);
            stats.record_scan(scan, false);
        }

        let snap = stats.snapshot();
        assert_eq!(snap.scan_count, 5);

        let ordered = |min: Option<i64>, avg: Option<i64>, max: Option<i64>| {
            let (min, avg, max) = (min.unwrap(), avg.unwrap(), max.unwrap());
            assert!(min <= avg, "min {min} > avg {avg}");
            assert!(avg <= max, "avg {avg} > max {max}");
        };
        ordered(snap.scan_time_min_us, snap.scan_time_avg_us, snap.scan_time_max_us);
        ordered(snap.cycle_time_min_us, snap.cycle_time_avg_us, snap.cycle_time_max_us);
        ordered(snap.latency_min_us, snap.latency_avg_us, snap.latency_max_us);
    }

    #[test]
    fn latency_handles_negative_samples() {
        let stats = ScanStats::new();
        stats.seed_cycle();
        stats.record_cycle(1_000_000, -50_000);
        stats.record_cycle(1_000_000, 30_000);

        let snap = stats.snapshot();
        assert_eq!(snap.latency_min_us, Some(-50));
        assert_eq!(snap.latency_max_us, Some(30));
    }

    #[test]
    fn overruns_accumulate() {
        let stats = ScanStats::new();
        stats.seed_cycle();
        stats.record_cycle(2_000_000, 0);
        stats.record_scan(1_900_000, true);
        stats.record_cycle(2_000_000, 0);
        stats.record_scan(300_000, false);

        assert_eq!(stats.snapshot().overruns, 1);
    }

    #[test]
    fn counters_never_decrease() {
        let stats = ScanStats::new();
        stats.seed_cycle();
        let mut last = 0;
        for _ in 0..10 {
            stats.record_cycle(1_000_000, 0);
            let n = stats.snapshot().scan_count;
            assert!(n > last);
            last = n;
        }
    }
}

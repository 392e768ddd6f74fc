//! Derived rates and percentages.
//!
//! Pure functions over pairs of snapshots. Kernel counters can go backwards
//! across device resets or pid reuse, so every delta is guarded: a regression
//! yields a zero rate for that window instead of a bogus huge value.

use crate::collector::snapshot::{ProcessSnapshot, SystemCpuSnapshot};
use crate::util::ticks_per_second;

/// Delta between two counter readings, `None` when the counter regressed.
pub fn checked_delta(curr: u64, prev: u64) -> Option<u64> {
    (curr >= prev).then(|| curr - prev)
}

/// System CPU utilization over the window between two `/proc/stat` reads,
/// as a percentage in [0, 100]. iowait counts as idle. A zero or regressed
/// total window yields 0.
pub fn cpu_usage_percent(prev: &SystemCpuSnapshot, curr: &SystemCpuSnapshot) -> f64 {
    let Some(total) = checked_delta(curr.total(), prev.total()) else {
        return 0.0;
    };
    if total == 0 {
        return 0.0;
    }
    let idle = checked_delta(curr.idle_total(), prev.idle_total()).unwrap_or(0);
    let busy = 100.0 * (1.0 - idle as f64 / total as f64);
    busy.clamp(0.0, 100.0)
}

/// Per-process CPU usage over a wall-clock window, as a percentage clamped
/// to [0, 100]. A non-positive window yields 0.
pub fn process_cpu_percent(prev: &ProcessSnapshot, curr: &ProcessSnapshot, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    let utime = checked_delta(curr.utime_ticks, prev.utime_ticks).unwrap_or(0);
    let stime = checked_delta(curr.stime_ticks, prev.stime_ticks).unwrap_or(0);
    let cpu_secs = (utime + stime) as f64 / ticks_per_second() as f64;
    (cpu_secs / elapsed_secs * 100.0).clamp(0.0, 100.0)
}

/// Per-process CPU usage measured against the system tick window, the way
/// a top-style sampler computes it: numerator and denominator come from the
/// same pair of reads, so clock skew between them cancels out.
pub fn process_cpu_percent_of_system(
    prev: &ProcessSnapshot,
    curr: &ProcessSnapshot,
    prev_sys: &SystemCpuSnapshot,
    curr_sys: &SystemCpuSnapshot,
) -> f64 {
    let Some(window) = checked_delta(curr_sys.total(), prev_sys.total()) else {
        return 0.0;
    };
    if window == 0 {
        return 0.0;
    }
    let utime = checked_delta(curr.utime_ticks, prev.utime_ticks).unwrap_or(0);
    let stime = checked_delta(curr.stime_ticks, prev.stime_ticks).unwrap_or(0);
    (100.0 * (utime + stime) as f64 / window as f64).clamp(0.0, 100.0)
}

/// Byte throughput between two cumulative counters. Counter wrap or reset
/// (a negative delta) yields 0 for that window.
pub fn byte_rate(prev_bytes: u64, curr_bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    checked_delta(curr_bytes, prev_bytes).unwrap_or(0) as f64 / elapsed_secs
}

/// `used` as a percentage of `total`; 0 when `total` is 0.
pub fn percentage(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * used as f64 / total as f64
}

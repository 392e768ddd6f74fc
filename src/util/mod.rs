//! Small shared helpers.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Clock ticks per second used by `/proc/[pid]/stat` time fields.
///
/// Asks libc; falls back to the USER_HZ value of 100 that every mainstream
/// kernel config uses when sysconf is unavailable.
pub fn ticks_per_second() -> u64 {
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 { hz as u64 } else { 100 }
}

/// System page size in bytes, for converting rss pages.
pub fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}

/// Milliseconds since the Unix epoch, for record timestamps.
pub fn timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Builds a transient cgroup name that cannot collide with another run:
/// prefix, our pid, epoch seconds and a per-process counter.
pub fn unique_group_name(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}-{}-{}-{}",
        prefix,
        std::process::id(),
        Utc::now().timestamp(),
        seq
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_per_second_positive() {
        assert!(ticks_per_second() > 0);
    }

    #[test]
    fn test_page_size_positive() {
        assert!(page_size() >= 4096);
    }

    #[test]
    fn test_unique_group_names_differ() {
        let a = unique_group_name("exp");
        let b = unique_group_name("exp");
        assert!(a.starts_with("exp-"));
        assert_ne!(a, b);
    }
}

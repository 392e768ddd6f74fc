//! Pure parsers for cgroup v2 interface files.
//!
//! These are lenient by design: the kernel adds keys over time and per-key
//! absence is normal, so unknown keys are skipped and missing keys stay zero.

use serde::{Deserialize, Serialize};

/// Counters from `cpu.stat`. All times are microseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStat {
    pub usage_usec: u64,
    pub user_usec: u64,
    pub system_usec: u64,
    pub nr_throttled: u64,
    pub throttled_usec: u64,
}

/// Parses `cpu.stat` flat keyed lines.
pub fn parse_cpu_stat(content: &str) -> CpuStat {
    let mut stat = CpuStat::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        let value = value.trim().parse::<u64>().unwrap_or(0);
        match key {
            "usage_usec" => stat.usage_usec = value,
            "user_usec" => stat.user_usec = value,
            "system_usec" => stat.system_usec = value,
            "nr_throttled" => stat.nr_throttled = value,
            "throttled_usec" => stat.throttled_usec = value,
            _ => {}
        }
    }
    stat
}

/// Parses a single-value file such as `memory.current`.
pub fn parse_single_u64(content: &str) -> Option<u64> {
    content.trim().parse().ok()
}

/// Extracts the `oom_kill` counter from `memory.events`.
pub fn parse_oom_kill(content: &str) -> u64 {
    content
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(' ')?;
            (key == "oom_kill").then(|| value.trim().parse::<u64>().ok())?
        })
        .unwrap_or(0)
}

/// Sums `rbytes=`/`wbytes=` across all device rows of `io.stat`.
/// Returns `(read_bytes, write_bytes)`.
pub fn parse_io_stat_totals(content: &str) -> (u64, u64) {
    let mut read = 0u64;
    let mut write = 0u64;
    for line in content.lines() {
        for token in line.split_whitespace() {
            if let Some(v) = token.strip_prefix("rbytes=") {
                read += v.parse::<u64>().unwrap_or(0);
            } else if let Some(v) = token.strip_prefix("wbytes=") {
                write += v.parse::<u64>().unwrap_or(0);
            }
        }
    }
    (read, write)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_stat() {
        let content = "\
usage_usec 1500000
user_usec 1000000
system_usec 500000
nr_periods 100
nr_throttled 25
throttled_usec 750000
";
        let stat = parse_cpu_stat(content);
        assert_eq!(stat.usage_usec, 1500000);
        assert_eq!(stat.user_usec, 1000000);
        assert_eq!(stat.system_usec, 500000);
        assert_eq!(stat.nr_throttled, 25);
        assert_eq!(stat.throttled_usec, 750000);
    }

    #[test]
    fn test_parse_cpu_stat_missing_keys_default_zero() {
        let stat = parse_cpu_stat("usage_usec 42\n");
        assert_eq!(stat.usage_usec, 42);
        assert_eq!(stat.throttled_usec, 0);
    }

    #[test]
    fn test_parse_single_u64() {
        assert_eq!(parse_single_u64("104857600\n"), Some(104857600));
        assert_eq!(parse_single_u64("max\n"), None);
    }

    #[test]
    fn test_parse_oom_kill() {
        let content = "low 0\nhigh 12\nmax 340\noom 2\noom_kill 2\n";
        assert_eq!(parse_oom_kill(content), 2);
        assert_eq!(parse_oom_kill("low 0\nhigh 0\n"), 0);
    }

    #[test]
    fn test_parse_io_stat_totals_sums_devices() {
        let content = "\
8:0 rbytes=1048576 wbytes=2097152 rios=100 wios=200 dbytes=0 dios=0
259:0 rbytes=524288 wbytes=1048576 rios=50 wios=100 dbytes=0 dios=0
";
        let (read, write) = parse_io_stat_totals(content);
        assert_eq!(read, 1572864);
        assert_eq!(write, 3145728);
    }

    #[test]
    fn test_parse_io_stat_totals_empty() {
        assert_eq!(parse_io_stat_totals(""), (0, 0));
    }
}

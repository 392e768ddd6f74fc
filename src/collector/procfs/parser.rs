//! Pure parsers for `/proc` text formats.
//!
//! Every function takes the file content as a string and returns a typed
//! result; no I/O happens here. The sampler owns path resolution and error
//! mapping.

use std::error::Error;
use std::fmt;

use crate::collector::snapshot::{
    DeviceIoSnapshot, MemorySnapshot, NetworkIfSnapshot, SystemCpuSnapshot,
};

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error: {}", self.message)
    }
}

impl Error for ParseError {}

/// Fields extracted from `/proc/[pid]/stat`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub minflt: u64,
    pub majflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub num_threads: u64,
    pub vsize: u64,
    pub rss: i64,
}

/// Optional fields extracted from `/proc/[pid]/status`.
///
/// Any key the kernel withholds stays zero; this parser cannot fail.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcStatus {
    pub threads: u64,
    pub vm_swap_kb: u64,
    pub voluntary_ctxt_switches: u64,
    pub nonvoluntary_ctxt_switches: u64,
}

/// Cumulative I/O counters from `/proc/[pid]/io`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcIo {
    pub rchar: u64,
    pub wchar: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
///
/// At least the first four tick fields (user, nice, system, idle) must be
/// present; later fields default to zero on older kernels.
pub fn parse_system_cpu(content: &str) -> Result<SystemCpuSnapshot, ParseError> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu ") || l.starts_with("cpu\t"))
        .ok_or_else(|| ParseError::new("missing aggregate cpu line in /proc/stat"))?;

    let ticks: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|t| {
            t.parse::<u64>()
                .map_err(|_| ParseError::new(format!("invalid cpu tick value: {t}")))
        })
        .collect::<Result<_, _>>()?;

    if ticks.len() < 4 {
        return Err(ParseError::new(format!(
            "aggregate cpu line has {} fields, need at least 4",
            ticks.len()
        )));
    }

    let get = |i: usize| ticks.get(i).copied().unwrap_or(0);
    Ok(SystemCpuSnapshot {
        user: get(0),
        nice: get(1),
        system: get(2),
        idle: get(3),
        iowait: get(4),
        irq: get(5),
        softirq: get(6),
        steal: get(7),
    })
}

/// Parses `/proc/[pid]/stat`.
///
/// The comm field may contain spaces and parentheses, so the parse is
/// two-stage: everything between the first `(` and the *last* `)` is comm,
/// and the remainder is tokenized positionally. If positional parsing fails
/// (a corrupted or shifted token), a numeric-scan fallback skips non-numeric
/// tokens and indexes the surviving numbers.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let open = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat line"))?;
    let close = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat line"))?;
    if close < open {
        return Err(ParseError::new("mismatched parentheses in stat line"));
    }

    let pid: u32 = content[..open]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid field in stat line"))?;
    let comm = content[open + 1..close].to_string();

    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if fields.len() < 22 {
        return Err(ParseError::new(format!(
            "stat line has {} fields after comm, need at least 22",
            fields.len()
        )));
    }

    let body = parse_stat_fields(&fields).or_else(|_| scan_stat_fields(&fields))?;
    Ok(ProcStat {
        pid,
        comm,
        ..body
    })
}

/// Positional parse of the post-comm stat fields. Field numbering follows
/// proc(5): state is field 3, so index 0 here.
fn parse_stat_fields(fields: &[&str]) -> Result<ProcStat, ParseError> {
    let state = single_state_char(fields[0])
        .ok_or_else(|| ParseError::new("invalid state field in stat line"))?;
    // ppid is not kept, but a failed parse here is the cheapest signal that
    // the token positions have shifted.
    fields[1]
        .parse::<i64>()
        .map_err(|_| ParseError::new("invalid ppid field in stat line"))?;

    let num = |i: usize, name: &str| -> Result<u64, ParseError> {
        fields[i]
            .parse::<u64>()
            .map_err(|_| ParseError::new(format!("invalid {name} field in stat line")))
    };
    let rss: i64 = fields[21]
        .parse()
        .map_err(|_| ParseError::new("invalid rss field in stat line"))?;

    Ok(ProcStat {
        state,
        minflt: num(7, "minflt")?,
        majflt: num(9, "majflt")?,
        utime: num(11, "utime")?,
        stime: num(12, "stime")?,
        num_threads: num(17, "num_threads")?,
        vsize: num(20, "vsize")?,
        rss,
        ..Default::default()
    })
}

/// Last-resort recovery: drop tokens that are not integers and index the
/// numeric sequence starting after the state field.
fn scan_stat_fields(fields: &[&str]) -> Result<ProcStat, ParseError> {
    let state = single_state_char(fields[0]).unwrap_or('?');
    let nums: Vec<i64> = fields
        .iter()
        .skip(1)
        .filter_map(|t| t.parse::<i64>().ok())
        .collect();
    // ppid=0 pgrp=1 session=2 tty=3 tpgid=4 flags=5 minflt=6 cminflt=7
    // majflt=8 cmajflt=9 utime=10 stime=11 ... num_threads=16 ... vsize=19 rss=20
    if nums.len() < 21 {
        return Err(ParseError::new(
            "stat line unrecoverable: too few numeric fields",
        ));
    }
    let unsigned = |i: usize| nums[i].max(0) as u64;
    Ok(ProcStat {
        state,
        minflt: unsigned(6),
        majflt: unsigned(8),
        utime: unsigned(10),
        stime: unsigned(11),
        num_threads: unsigned(16),
        vsize: unsigned(19),
        rss: nums[20],
        ..Default::default()
    })
}

fn single_state_char(token: &str) -> Option<char> {
    let mut chars = token.chars();
    let c = chars.next()?;
    (chars.next().is_none() && c.is_ascii_alphabetic()).then_some(c)
}

/// Parses `/proc/[pid]/status` key/value lines. Unknown keys are ignored and
/// missing keys stay zero.
pub fn parse_proc_status(content: &str) -> ProcStatus {
    let mut status = ProcStatus::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let parsed = || {
            value
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };
        match key.trim() {
            "Threads" => status.threads = parsed(),
            "VmSwap" => status.vm_swap_kb = parsed(),
            "voluntary_ctxt_switches" => status.voluntary_ctxt_switches = parsed(),
            "nonvoluntary_ctxt_switches" => status.nonvoluntary_ctxt_switches = parsed(),
            _ => {}
        }
    }
    status
}

/// Parses `/proc/[pid]/io`. Missing counters stay zero.
pub fn parse_proc_io(content: &str) -> ProcIo {
    let mut io = ProcIo::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().parse::<u64>().unwrap_or(0);
        match key.trim() {
            "rchar" => io.rchar = value,
            "wchar" => io.wchar = value,
            "read_bytes" => io.read_bytes = value,
            "write_bytes" => io.write_bytes = value,
            _ => {}
        }
    }
    io
}

/// Parses `/proc/meminfo`. `MemTotal` is required; when `MemAvailable` is
/// absent (pre-3.14 kernels) it is approximated as free + buffers + cached.
pub fn parse_meminfo(content: &str) -> Result<MemorySnapshot, ParseError> {
    let mut snap = MemorySnapshot::default();
    let mut has_total = false;
    let mut has_available = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let kb = value
            .trim()
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        match key.trim() {
            "MemTotal" => {
                snap.total_kb = kb;
                has_total = true;
            }
            "MemFree" => snap.free_kb = kb,
            "MemAvailable" => {
                snap.available_kb = kb;
                has_available = true;
            }
            "Buffers" => snap.buffers_kb = kb,
            "Cached" => snap.cached_kb = kb,
            "SwapTotal" => snap.swap_total_kb = kb,
            "SwapFree" => snap.swap_free_kb = kb,
            _ => {}
        }
    }

    if !has_total {
        return Err(ParseError::new("missing MemTotal in /proc/meminfo"));
    }
    if !has_available {
        snap.available_kb = snap.free_kb + snap.buffers_kb + snap.cached_kb;
    }
    Ok(snap)
}

/// Parses `/proc/diskstats` into one snapshot per device row. Rows with
/// fewer than 14 fields are skipped.
pub fn parse_diskstats(content: &str) -> Vec<DeviceIoSnapshot> {
    let mut devices = Vec::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 14 {
            continue;
        }
        let num = |i: usize| fields[i].parse::<u64>().unwrap_or(0);
        let (Ok(major), Ok(minor)) = (fields[0].parse::<u32>(), fields[1].parse::<u32>()) else {
            continue;
        };
        devices.push(DeviceIoSnapshot {
            major,
            minor,
            device_name: fields[2].to_string(),
            reads_completed: num(3),
            sectors_read: num(5),
            writes_completed: num(7),
            sectors_written: num(9),
        });
    }
    devices
}

/// Parses `/proc/net/dev` into one snapshot per interface. The two header
/// lines and malformed rows are skipped.
pub fn parse_net_dev(content: &str) -> Vec<NetworkIfSnapshot> {
    let mut interfaces = Vec::new();
    for line in content.lines() {
        if line.contains('|') {
            continue;
        }
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let values: Vec<u64> = counters
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if values.len() < 11 {
            continue;
        }
        interfaces.push(NetworkIfSnapshot {
            interface: name.trim().to_string(),
            rx_bytes: values[0],
            rx_packets: values[1],
            rx_errors: values[2],
            tx_bytes: values[8],
            tx_packets: values[9],
            tx_errors: values[10],
        });
    }
    interfaces
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_STAT: &str = "\
cpu  74608 2520 24433 1117073 6176 4054 0 330 0 0
cpu0 17382 590 6121 279280 1544 1013 0 82 0 0
intr 5817800 57 10 0 0
ctxt 12345678
btime 1699000000
";

    #[test]
    fn test_parse_system_cpu() {
        let snap = parse_system_cpu(PROC_STAT).unwrap();
        assert_eq!(snap.user, 74608);
        assert_eq!(snap.nice, 2520);
        assert_eq!(snap.system, 24433);
        assert_eq!(snap.idle, 1117073);
        assert_eq!(snap.iowait, 6176);
        assert_eq!(snap.steal, 330);
    }

    #[test]
    fn test_parse_system_cpu_short_line() {
        // Old kernels report only the first four fields.
        let snap = parse_system_cpu("cpu 1 2 3 4\n").unwrap();
        assert_eq!(snap.idle, 4);
        assert_eq!(snap.iowait, 0);
        assert_eq!(snap.steal, 0);
    }

    #[test]
    fn test_parse_system_cpu_too_few_fields() {
        assert!(parse_system_cpu("cpu 1 2 3\n").is_err());
        assert!(parse_system_cpu("intr 1 2 3 4\n").is_err());
    }

    #[test]
    fn test_parse_proc_stat_basic() {
        let content = "1234 (bash) S 1 1234 1234 34816 1234 4194304 \
                       1500 0 3 0 250 120 0 0 20 0 2 0 100 \
                       8192000 450 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat.pid, 1234);
        assert_eq!(stat.comm, "bash");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.minflt, 1500);
        assert_eq!(stat.majflt, 3);
        assert_eq!(stat.utime, 250);
        assert_eq!(stat.stime, 120);
        assert_eq!(stat.num_threads, 2);
        assert_eq!(stat.vsize, 8192000);
        assert_eq!(stat.rss, 450);
    }

    #[test]
    fn test_parse_proc_stat_comm_with_spaces_and_parens() {
        let content = "42 (tmux: server (1)) R 1 42 42 0 -1 4194304 \
                       10 0 0 0 5 7 0 0 20 0 1 0 50 \
                       4096000 100 0 1 1 0 0 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat.comm, "tmux: server (1)");
        assert_eq!(stat.state, 'R');
        assert_eq!(stat.utime, 5);
        assert_eq!(stat.stime, 7);
    }

    #[test]
    fn test_parse_proc_stat_fallback_recovers_from_stray_token() {
        // A non-numeric token after the state field shifts every position;
        // the numeric scan drops it and realigns.
        let content = "99 (worker) Z <defunct> 1 99 99 0 -1 4194304 \
                       77 0 2 0 33 44 0 0 20 0 4 0 10 \
                       1024000 25 0 1 1 0 0 0 0 0 0 0 0 0 0 17 1 0 0";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat.state, 'Z');
        assert_eq!(stat.minflt, 77);
        assert_eq!(stat.majflt, 2);
        assert_eq!(stat.utime, 33);
        assert_eq!(stat.stime, 44);
        assert_eq!(stat.num_threads, 4);
        assert_eq!(stat.vsize, 1024000);
        assert_eq!(stat.rss, 25);
    }

    #[test]
    fn test_parse_proc_stat_rejects_garbage() {
        assert!(parse_proc_stat("").is_err());
        assert!(parse_proc_stat("1234 no parens here").is_err());
        assert!(parse_proc_stat("1234 (x) S 1 2 3").is_err());
    }

    #[test]
    fn test_parse_proc_status() {
        let content = "\
Name:\tbash
State:\tS (sleeping)
Threads:\t3
VmSwap:\t    128 kB
voluntary_ctxt_switches:\t150
nonvoluntary_ctxt_switches:\t12
";
        let status = parse_proc_status(content);
        assert_eq!(status.threads, 3);
        assert_eq!(status.vm_swap_kb, 128);
        assert_eq!(status.voluntary_ctxt_switches, 150);
        assert_eq!(status.nonvoluntary_ctxt_switches, 12);
    }

    #[test]
    fn test_parse_proc_status_missing_keys_default_zero() {
        let status = parse_proc_status("Name:\tkthreadd\nThreads:\t1\n");
        assert_eq!(status.threads, 1);
        assert_eq!(status.vm_swap_kb, 0);
        assert_eq!(status.voluntary_ctxt_switches, 0);
    }

    #[test]
    fn test_parse_proc_io() {
        let content = "\
rchar: 323934931
wchar: 323929600
syscr: 632687
syscw: 632675
read_bytes: 12288
write_bytes: 323932160
cancelled_write_bytes: 0
";
        let io = parse_proc_io(content);
        assert_eq!(io.rchar, 323934931);
        assert_eq!(io.wchar, 323929600);
        assert_eq!(io.read_bytes, 12288);
        assert_eq!(io.write_bytes, 323932160);
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12288000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4000000 kB
";
        let snap = parse_meminfo(content).unwrap();
        assert_eq!(snap.total_kb, 16384000);
        assert_eq!(snap.available_kb, 12288000);
        assert_eq!(snap.swap_free_kb, 4000000);
        assert_eq!(snap.used_kb(), 4096000);
    }

    #[test]
    fn test_parse_meminfo_without_available() {
        let content = "MemTotal: 1000 kB\nMemFree: 400 kB\nBuffers: 50 kB\nCached: 150 kB\n";
        let snap = parse_meminfo(content).unwrap();
        assert_eq!(snap.available_kb, 600);
    }

    #[test]
    fn test_parse_meminfo_requires_total() {
        assert!(parse_meminfo("MemFree: 400 kB\n").is_err());
    }

    #[test]
    fn test_parse_diskstats() {
        let content = "\
   7       0 loop0 100 0 800 5 0 0 0 0 0 5 5
   8       0 sda 123456 789 9876543 4321 654321 987 7654321 8765 0 12345 13086
   8       1 sda1 123000 700 9800000 4300 654000 980 7600000 8700 0 12300 13000
 259       0 nvme0n1 50 0 400 2 60 0 480 3 0 5 5
";
        let devices = parse_diskstats(content);
        assert_eq!(devices.len(), 4);
        let sda = &devices[1];
        assert_eq!(sda.device_name, "sda");
        assert_eq!(sda.major, 8);
        assert_eq!(sda.minor, 0);
        assert_eq!(sda.reads_completed, 123456);
        assert_eq!(sda.sectors_read, 9876543);
        assert_eq!(sda.writes_completed, 654321);
        assert_eq!(sda.sectors_written, 7654321);
        assert_eq!(devices[3].device_id(), "259:0");
    }

    #[test]
    fn test_parse_net_dev() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1234567    8901    0    0    0     0          0         0  1234567    8901    0    0    0     0       0          0
  eth0: 987654321 654321    2    0    0     0          0         0 123456789 234567    1    0    0     0       0          0
";
        let interfaces = parse_net_dev(content);
        assert_eq!(interfaces.len(), 2);
        let eth0 = &interfaces[1];
        assert_eq!(eth0.interface, "eth0");
        assert_eq!(eth0.rx_bytes, 987654321);
        assert_eq!(eth0.rx_packets, 654321);
        assert_eq!(eth0.rx_errors, 2);
        assert_eq!(eth0.tx_bytes, 123456789);
        assert_eq!(eth0.tx_errors, 1);
    }
}

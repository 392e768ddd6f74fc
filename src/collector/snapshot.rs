//! Raw counter snapshots read from `/proc`.
//!
//! Snapshots are immutable value types carrying monotonic kernel counters.
//! All rate and percentage derivation happens in [`crate::collector::rates`]
//! from *pairs* of snapshots; nothing here is a rate.

use serde::{Deserialize, Serialize};

/// Bytes per disk sector in `/proc/diskstats`. The kernel reports sectors in
/// fixed 512-byte units regardless of the device's physical sector size.
pub const SECTOR_SIZE: u64 = 512;

/// Aggregate CPU time from the first line of `/proc/stat`, in clock ticks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemCpuSnapshot {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl SystemCpuSnapshot {
    /// Sum of all tick fields.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Ticks the CPU spent not doing work. Time waiting for I/O counts as
    /// idle for utilization purposes.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// Per-process counters combined from `/proc/[pid]/stat`, `status` and `io`.
///
/// The `status` and `io` derived fields are zero when the kernel withholds
/// them (config, permissions); their absence never fails a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub vsize_bytes: u64,
    pub rss_pages: i64,
    pub threads: u64,
    pub minflt: u64,
    pub majflt: u64,
    pub vm_swap_kb: u64,
    pub voluntary_ctxt_switches: u64,
    pub nonvoluntary_ctxt_switches: u64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
}

impl Default for ProcessSnapshot {
    fn default() -> Self {
        Self {
            pid: 0,
            comm: String::new(),
            state: '?',
            utime_ticks: 0,
            stime_ticks: 0,
            vsize_bytes: 0,
            rss_pages: 0,
            threads: 0,
            minflt: 0,
            majflt: 0,
            vm_swap_kb: 0,
            voluntary_ctxt_switches: 0,
            nonvoluntary_ctxt_switches: 0,
            io_read_bytes: 0,
            io_write_bytes: 0,
        }
    }
}

/// One device row of `/proc/diskstats`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIoSnapshot {
    pub major: u32,
    pub minor: u32,
    pub device_name: String,
    pub reads_completed: u64,
    pub sectors_read: u64,
    pub writes_completed: u64,
    pub sectors_written: u64,
}

impl DeviceIoSnapshot {
    pub fn read_bytes(&self) -> u64 {
        self.sectors_read * SECTOR_SIZE
    }

    pub fn write_bytes(&self) -> u64 {
        self.sectors_written * SECTOR_SIZE
    }

    /// The `major:minor` pair as the cgroup io controller expects it.
    pub fn device_id(&self) -> String {
        format!("{}:{}", self.major, self.minor)
    }
}

/// One interface row of `/proc/net/dev`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIfSnapshot {
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
}

/// System-wide memory figures from `/proc/meminfo`, in kilobytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total_kb: u64,
    pub free_kb: u64,
    pub available_kb: u64,
    pub buffers_kb: u64,
    pub cached_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

impl MemorySnapshot {
    /// Memory in use, counting reclaimable memory as free.
    pub fn used_kb(&self) -> u64 {
        self.total_kb.saturating_sub(self.available_kb)
    }

    pub fn usage_percent(&self) -> f64 {
        crate::collector::rates::percentage(self.used_kb(), self.total_kb)
    }
}

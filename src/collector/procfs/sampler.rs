//! `ProcSampler`: binds the pure parsers to a filesystem and owns the
//! sampling error taxonomy.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collector::procfs::parser::{
    self, ParseError,
};
use crate::collector::snapshot::{
    DeviceIoSnapshot, MemorySnapshot, NetworkIfSnapshot, ProcessSnapshot, SystemCpuSnapshot,
};
use crate::collector::traits::FileSystem;

/// Devices probed in order when no block device is named explicitly.
const DEVICE_CANDIDATES: [&str; 3] = ["sda", "vda", "nvme0n1"];

/// Errors that can occur while sampling kernel interfaces.
#[derive(Debug)]
pub enum SampleError {
    /// A system-wide pseudo-file could not be read at all.
    Unavailable { path: PathBuf, source: io::Error },
    /// The `/proc/[pid]` entry is gone: the process exited.
    ProcessNotFound(u32),
    /// No row for the named block device in `/proc/diskstats`.
    DeviceNotFound(String),
    /// No row for the named interface in `/proc/net/dev`.
    InterfaceNotFound(String),
    /// The file was readable but its content did not parse.
    Parse { path: PathBuf, source: ParseError },
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::Unavailable { path, source } => {
                write!(f, "kernel interface {} unavailable: {}", path.display(), source)
            }
            SampleError::ProcessNotFound(pid) => write!(f, "process {pid} not found"),
            SampleError::DeviceNotFound(dev) => write!(f, "block device {dev} not found"),
            SampleError::InterfaceNotFound(iface) => {
                write!(f, "network interface {iface} not found")
            }
            SampleError::Parse { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
        }
    }
}

impl Error for SampleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SampleError::Unavailable { source, .. } => Some(source),
            SampleError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Reads raw counter snapshots out of a `/proc` tree.
///
/// All reads go through the [`FileSystem`] abstraction so the sampler can be
/// exercised against [`MockFs`](crate::collector::mock::MockFs) fixtures.
#[derive(Debug, Clone)]
pub struct ProcSampler<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
}

impl<F: FileSystem> ProcSampler<F> {
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
        }
    }

    /// Samples the aggregate CPU line of `/proc/stat`.
    pub fn sample_system_cpu(&self) -> Result<SystemCpuSnapshot, SampleError> {
        let path = self.proc_path.join("stat");
        let content = self.read_system_file(&path)?;
        parser::parse_system_cpu(&content).map_err(|source| SampleError::Parse { path, source })
    }

    /// Samples system-wide memory from `/proc/meminfo`.
    pub fn sample_memory(&self) -> Result<MemorySnapshot, SampleError> {
        let path = self.proc_path.join("meminfo");
        let content = self.read_system_file(&path)?;
        parser::parse_meminfo(&content).map_err(|source| SampleError::Parse { path, source })
    }

    /// Returns whether `/proc/[pid]` currently exists.
    pub fn process_exists(&self, pid: u32) -> bool {
        self.fs.exists(&self.proc_path.join(pid.to_string()))
    }

    /// Samples one process. The stat file is mandatory; status and io are
    /// merged in when readable and stay zero otherwise.
    pub fn sample_process(&self, pid: u32) -> Result<ProcessSnapshot, SampleError> {
        let base = self.proc_path.join(pid.to_string());
        let stat_path = base.join("stat");
        let content = self
            .fs
            .read_to_string(&stat_path)
            .map_err(|_| SampleError::ProcessNotFound(pid))?;
        let stat = parser::parse_proc_stat(&content).map_err(|source| SampleError::Parse {
            path: stat_path,
            source,
        })?;

        let status = self
            .fs
            .read_to_string(&base.join("status"))
            .map(|c| parser::parse_proc_status(&c))
            .unwrap_or_default();
        let io = self
            .fs
            .read_to_string(&base.join("io"))
            .map(|c| parser::parse_proc_io(&c))
            .unwrap_or_default();

        Ok(ProcessSnapshot {
            pid: stat.pid,
            comm: stat.comm,
            state: stat.state,
            utime_ticks: stat.utime,
            stime_ticks: stat.stime,
            vsize_bytes: stat.vsize,
            rss_pages: stat.rss,
            // status Threads wins over stat num_threads when present; stat
            // keeps working on kernels without the status field.
            threads: if status.threads > 0 {
                status.threads
            } else {
                stat.num_threads
            },
            minflt: stat.minflt,
            majflt: stat.majflt,
            vm_swap_kb: status.vm_swap_kb,
            voluntary_ctxt_switches: status.voluntary_ctxt_switches,
            nonvoluntary_ctxt_switches: status.nonvoluntary_ctxt_switches,
            io_read_bytes: io.read_bytes,
            io_write_bytes: io.write_bytes,
        })
    }

    /// Samples one named device row of `/proc/diskstats`.
    pub fn sample_device_io(&self, device: &str) -> Result<DeviceIoSnapshot, SampleError> {
        let path = self.proc_path.join("diskstats");
        let content = self.read_system_file(&path)?;
        parser::parse_diskstats(&content)
            .into_iter()
            .find(|d| d.device_name == device)
            .ok_or_else(|| SampleError::DeviceNotFound(device.to_string()))
    }

    /// Samples one named interface row of `/proc/net/dev`.
    pub fn sample_network_if(&self, interface: &str) -> Result<NetworkIfSnapshot, SampleError> {
        let path = self.proc_path.join("net").join("dev");
        let content = self.read_system_file(&path)?;
        parser::parse_net_dev(&content)
            .into_iter()
            .find(|i| i.interface == interface)
            .ok_or_else(|| SampleError::InterfaceNotFound(interface.to_string()))
    }

    /// Probes the usual block device names and returns the first present.
    pub fn detect_block_device(&self) -> Option<DeviceIoSnapshot> {
        for candidate in DEVICE_CANDIDATES {
            if let Ok(snap) = self.sample_device_io(candidate) {
                debug!(device = candidate, "detected block device");
                return Some(snap);
            }
        }
        None
    }

    fn read_system_file(&self, path: &Path) -> Result<String, SampleError> {
        self.fs
            .read_to_string(path)
            .map_err(|source| SampleError::Unavailable {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    const STAT_LINE: &str = "4242 (test proc) S 1 4242 4242 0 -1 4194304 \
                             100 0 1 0 50 25 0 0 20 0 2 0 100 \
                             2048000 300 0 1 1 0 0 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0";

    const STATUS: &str = "Name:\ttest proc\nThreads:\t2\nVmSwap:\t64 kB\n\
                          voluntary_ctxt_switches:\t10\nnonvoluntary_ctxt_switches:\t4\n";

    const IO: &str = "rchar: 100\nwchar: 200\nread_bytes: 4096\nwrite_bytes: 8192\n";

    fn sampler_with_process() -> ProcSampler<MockFs> {
        let fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu  100 0 50 800 20 5 5 20 0 0\n");
        fs.add_process(Path::new("/proc"), 4242, STAT_LINE, STATUS, IO);
        ProcSampler::new(fs, "/proc")
    }

    #[test]
    fn test_sample_system_cpu() {
        let sampler = sampler_with_process();
        let snap = sampler.sample_system_cpu().unwrap();
        assert_eq!(snap.user, 100);
        assert_eq!(snap.total(), 1000);
    }

    #[test]
    fn test_sample_system_cpu_unavailable() {
        let sampler = ProcSampler::new(MockFs::new(), "/proc");
        match sampler.sample_system_cpu() {
            Err(SampleError::Unavailable { path, .. }) => {
                assert_eq!(path, PathBuf::from("/proc/stat"));
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_sample_process_merges_all_sources() {
        let sampler = sampler_with_process();
        let snap = sampler.sample_process(4242).unwrap();
        assert_eq!(snap.pid, 4242);
        assert_eq!(snap.comm, "test proc");
        assert_eq!(snap.utime_ticks, 50);
        assert_eq!(snap.stime_ticks, 25);
        assert_eq!(snap.vsize_bytes, 2048000);
        assert_eq!(snap.rss_pages, 300);
        assert_eq!(snap.threads, 2);
        assert_eq!(snap.vm_swap_kb, 64);
        assert_eq!(snap.voluntary_ctxt_switches, 10);
        assert_eq!(snap.io_read_bytes, 4096);
        assert_eq!(snap.io_write_bytes, 8192);
    }

    #[test]
    fn test_sample_process_without_optional_files() {
        let fs = MockFs::new();
        fs.add_file("/proc/77/stat", STAT_LINE.replacen("4242 (test proc)", "77 (bare)", 1));
        let sampler = ProcSampler::new(fs, "/proc");
        let snap = sampler.sample_process(77).unwrap();
        assert_eq!(snap.pid, 77);
        assert_eq!(snap.vm_swap_kb, 0);
        assert_eq!(snap.io_write_bytes, 0);
        // falls back to num_threads from stat
        assert_eq!(snap.threads, 2);
    }

    #[test]
    fn test_sample_process_not_found() {
        let sampler = sampler_with_process();
        match sampler.sample_process(9999) {
            Err(SampleError::ProcessNotFound(9999)) => {}
            other => panic!("expected ProcessNotFound, got {other:?}"),
        }
        assert!(!sampler.process_exists(9999));
        assert!(sampler.process_exists(4242));
    }

    #[test]
    fn test_sample_device_io_by_name() {
        let fs = MockFs::new();
        fs.add_file(
            "/proc/diskstats",
            "   8 0 sda 10 0 80 1 20 0 160 2 0 3 3\n 252 0 vda 5 0 40 1 6 0 48 1 0 1 1\n",
        );
        let sampler = ProcSampler::new(fs, "/proc");
        let vda = sampler.sample_device_io("vda").unwrap();
        assert_eq!(vda.sectors_written, 48);
        match sampler.sample_device_io("sdz") {
            Err(SampleError::DeviceNotFound(d)) => assert_eq!(d, "sdz"),
            other => panic!("expected DeviceNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_detect_block_device_prefers_sda() {
        let fs = MockFs::new();
        fs.add_file(
            "/proc/diskstats",
            " 252 0 vda 5 0 40 1 6 0 48 1 0 1 1\n   8 0 sda 10 0 80 1 20 0 160 2 0 3 3\n",
        );
        let sampler = ProcSampler::new(fs, "/proc");
        let dev = sampler.detect_block_device().unwrap();
        assert_eq!(dev.device_name, "sda");
    }

    #[test]
    fn test_sample_network_if() {
        let fs = MockFs::new();
        fs.add_file(
            "/proc/net/dev",
            "Inter-|   Receive |  Transmit\n face |bytes packets errs drop fifo frame compressed multicast|bytes packets errs drop fifo colls carrier compressed\n\
             eth0: 1000 10 0 0 0 0 0 0 2000 20 1 0 0 0 0 0\n",
        );
        let sampler = ProcSampler::new(fs, "/proc");
        let eth0 = sampler.sample_network_if("eth0").unwrap();
        assert_eq!(eth0.rx_bytes, 1000);
        assert_eq!(eth0.tx_errors, 1);
        assert!(matches!(
            sampler.sample_network_if("wlan0"),
            Err(SampleError::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn test_sample_memory() {
        let fs = MockFs::new();
        fs.add_file("/proc/meminfo", "MemTotal: 1000 kB\nMemFree: 400 kB\nMemAvailable: 500 kB\n");
        let sampler = ProcSampler::new(fs, "/proc");
        let snap = sampler.sample_memory().unwrap();
        assert_eq!(snap.used_kb(), 500);
    }
}

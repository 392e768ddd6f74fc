//! `CgroupController`: lifecycle, membership, limits and counters for
//! transient cgroup v2 groups directly under the mount root.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cgroup::parser::{self, CpuStat};
use crate::collector::traits::FileSystem;

/// Where cgroup v2 lives on every systemd-era distribution.
pub const DEFAULT_CGROUP_MOUNT: &str = "/sys/fs/cgroup";

/// Errors from cgroup control operations.
#[derive(Debug)]
pub enum CgroupError {
    /// The mount does not expose a cgroup v2 hierarchy.
    Unsupported { mount: PathBuf },
    /// The named group does not exist.
    NotExists(String),
    /// The named group already exists.
    AlreadyExists(String),
    /// The group still has member processes and cannot be removed.
    NotEmpty(String),
    /// A value failed this controller's local domain validation.
    InvalidValue(String),
    /// The kernel rejected a write into a control file.
    WriteRejected { file: PathBuf, source: io::Error },
    /// Any other I/O failure against the cgroup tree.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for CgroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgroupError::Unsupported { mount } => {
                write!(f, "no cgroup v2 hierarchy at {}", mount.display())
            }
            CgroupError::NotExists(name) => write!(f, "cgroup {name} does not exist"),
            CgroupError::AlreadyExists(name) => write!(f, "cgroup {name} already exists"),
            CgroupError::NotEmpty(name) => write!(f, "cgroup {name} still has member processes"),
            CgroupError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            CgroupError::WriteRejected { file, source } => {
                write!(f, "kernel rejected write to {}: {}", file.display(), source)
            }
            CgroupError::Io { path, source } => {
                write!(f, "cgroup I/O error at {}: {}", path.display(), source)
            }
        }
    }
}

impl Error for CgroupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CgroupError::WriteRejected { source, .. } | CgroupError::Io { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// A created group: its name, where it lives, and when it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupHandle {
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Drives a cgroup v2 hierarchy through a [`FileSystem`].
///
/// Every operation that targets a named group checks existence first, so a
/// vanished group surfaces as [`CgroupError::NotExists`] rather than a raw
/// I/O error from deep inside a write.
#[derive(Debug, Clone)]
pub struct CgroupController<F: FileSystem> {
    fs: F,
    mount: PathBuf,
}

impl<F: FileSystem> CgroupController<F> {
    pub fn new(fs: F, mount: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            mount: mount.into(),
        }
    }

    /// Whether the mount exposes a cgroup v2 hierarchy at all. The
    /// `cgroup.controllers` file only exists on v2.
    pub fn is_available(&self) -> bool {
        self.fs.exists(&self.mount.join("cgroup.controllers"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.fs.exists(&self.group_path(name))
    }

    fn group_path(&self, name: &str) -> PathBuf {
        self.mount.join(name)
    }

    fn control_file(&self, name: &str, file: &str) -> PathBuf {
        self.group_path(name).join(file)
    }

    /// Creates a group directly under the mount root.
    pub fn create(&self, name: &str) -> Result<CgroupHandle, CgroupError> {
        if !self.is_available() {
            return Err(CgroupError::Unsupported {
                mount: self.mount.clone(),
            });
        }
        if self.exists(name) {
            return Err(CgroupError::AlreadyExists(name.to_string()));
        }
        let path = self.group_path(name);
        self.fs.create_dir(&path).map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => CgroupError::AlreadyExists(name.to_string()),
            _ => CgroupError::Io {
                path: path.clone(),
                source,
            },
        })?;
        debug!(group = name, "created cgroup");
        Ok(CgroupHandle {
            name: name.to_string(),
            path,
            created_at: Utc::now(),
        })
    }

    /// Removes a group. Fails with [`CgroupError::NotEmpty`] while any
    /// process is still attached; the kernel would reject the rmdir anyway,
    /// but the check gives the caller a name it can act on.
    pub fn delete(&self, name: &str) -> Result<(), CgroupError> {
        if !self.exists(name) {
            return Err(CgroupError::NotExists(name.to_string()));
        }
        if !self.member_pids(name)?.is_empty() {
            return Err(CgroupError::NotEmpty(name.to_string()));
        }
        let path = self.group_path(name);
        self.fs
            .remove_dir(&path)
            .map_err(|source| CgroupError::Io { path, source })?;
        debug!(group = name, "removed cgroup");
        Ok(())
    }

    /// Pids currently attached to the group.
    pub fn member_pids(&self, name: &str) -> Result<Vec<u32>, CgroupError> {
        if !self.exists(name) {
            return Err(CgroupError::NotExists(name.to_string()));
        }
        let path = self.control_file(name, "cgroup.procs");
        let content = match self.fs.read_to_string(&path) {
            Ok(content) => content,
            // Group exists but the file is unreadable: treat as drained,
            // the subsequent rmdir will say otherwise if it is not.
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(CgroupError::Io { path, source }),
        };
        Ok(content
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    /// Moves a process into the group.
    pub fn add_process(&self, name: &str, pid: u32) -> Result<(), CgroupError> {
        self.write_control(name, "cgroup.procs", &pid.to_string())
    }

    /// Moves a process back to the root group.
    pub fn remove_process(&self, name: &str, pid: u32) -> Result<(), CgroupError> {
        if !self.exists(name) {
            return Err(CgroupError::NotExists(name.to_string()));
        }
        let file = self.mount.join("cgroup.procs");
        self.fs
            .write_string(&file, &pid.to_string())
            .map_err(|source| CgroupError::WriteRejected { file, source })
    }

    /// Sets `cpu.max`. `quota_usec = None` lifts the bandwidth cap
    /// (`max <period>`); a bounded quota must be positive.
    pub fn set_cpu_limit(
        &self,
        name: &str,
        quota_usec: Option<u64>,
        period_usec: u64,
    ) -> Result<(), CgroupError> {
        if period_usec == 0 {
            return Err(CgroupError::InvalidValue("cpu period must be positive".into()));
        }
        let value = match quota_usec {
            None => format!("max {period_usec}"),
            Some(0) => {
                return Err(CgroupError::InvalidValue("cpu quota must be positive".into()));
            }
            Some(quota) => format!("{quota} {period_usec}"),
        };
        self.write_control(name, "cpu.max", &value)
    }

    /// Sets `cpu.weight`. The kernel domain is [1, 10000].
    pub fn set_cpu_weight(&self, name: &str, weight: u32) -> Result<(), CgroupError> {
        if !(1..=10000).contains(&weight) {
            return Err(CgroupError::InvalidValue(format!(
                "cpu weight {weight} outside [1, 10000]"
            )));
        }
        self.write_control(name, "cpu.weight", &weight.to_string())
    }

    /// Sets the hard memory limit (`memory.max`), in bytes.
    pub fn set_memory_max(&self, name: &str, bytes: u64) -> Result<(), CgroupError> {
        self.write_control(name, "memory.max", &bytes.to_string())
    }

    /// Sets the soft memory limit (`memory.high`), in bytes.
    pub fn set_memory_high(&self, name: &str, bytes: u64) -> Result<(), CgroupError> {
        self.write_control(name, "memory.high", &bytes.to_string())
    }

    /// Sets `io.max` for one device. A zero bound means no explicit limit in
    /// that direction and is written as `max`.
    pub fn set_io_max(
        &self,
        name: &str,
        device_id: &str,
        read_bps: u64,
        write_bps: u64,
    ) -> Result<(), CgroupError> {
        validate_device_id(device_id)?;
        let bound = |bps: u64| {
            if bps == 0 {
                "max".to_string()
            } else {
                bps.to_string()
            }
        };
        let value = format!("{} rbps={} wbps={}", device_id, bound(read_bps), bound(write_bps));
        self.write_control(name, "io.max", &value)
    }

    /// Total CPU time consumed by the group, in microseconds.
    pub fn cpu_usage_usec(&self, name: &str) -> Result<u64, CgroupError> {
        Ok(self.cpu_stat(name)?.usage_usec)
    }

    /// Full `cpu.stat` counters including throttling.
    pub fn cpu_stat(&self, name: &str) -> Result<CpuStat, CgroupError> {
        let content = self.read_control(name, "cpu.stat")?;
        Ok(parser::parse_cpu_stat(&content))
    }

    /// Current memory footprint of the group, in bytes.
    pub fn memory_current(&self, name: &str) -> Result<u64, CgroupError> {
        let path = self.control_file(name, "memory.current");
        let content = self.read_control(name, "memory.current")?;
        parser::parse_single_u64(&content).ok_or_else(|| CgroupError::Io {
            path,
            source: io::Error::new(io::ErrorKind::InvalidData, "not a number"),
        })
    }

    /// The group's cumulative I/O totals from `io.stat`, summed across
    /// devices. Returns `(read_bytes, write_bytes)`.
    pub fn io_totals(&self, name: &str) -> Result<(u64, u64), CgroupError> {
        let content = self.read_control(name, "io.stat")?;
        Ok(parser::parse_io_stat_totals(&content))
    }

    /// How many times the kernel OOM-killed a member of this group.
    pub fn oom_kill_count(&self, name: &str) -> Result<u64, CgroupError> {
        let content = self.read_control(name, "memory.events")?;
        Ok(parser::parse_oom_kill(&content))
    }

    fn read_control(&self, name: &str, file: &str) -> Result<String, CgroupError> {
        if !self.exists(name) {
            return Err(CgroupError::NotExists(name.to_string()));
        }
        let path = self.control_file(name, file);
        self.fs
            .read_to_string(&path)
            .map_err(|source| CgroupError::Io { path, source })
    }

    fn write_control(&self, name: &str, file: &str, value: &str) -> Result<(), CgroupError> {
        if !self.exists(name) {
            return Err(CgroupError::NotExists(name.to_string()));
        }
        let path = self.control_file(name, file);
        debug!(group = name, file, value, "writing control file");
        self.fs
            .write_string(&path, value)
            .map_err(|source| CgroupError::WriteRejected { file: path, source })
    }
}

fn validate_device_id(device_id: &str) -> Result<(), CgroupError> {
    let valid = device_id
        .split_once(':')
        .is_some_and(|(major, minor)| {
            major.parse::<u32>().is_ok() && minor.parse::<u32>().is_ok()
        });
    if valid {
        Ok(())
    } else {
        Err(CgroupError::InvalidValue(format!(
            "device id {device_id} is not major:minor"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    const MOUNT: &str = "/sys/fs/cgroup";

    fn v2_fs() -> MockFs {
        let fs = MockFs::new();
        fs.add_file(format!("{MOUNT}/cgroup.controllers"), "cpuset cpu io memory\n");
        fs.add_file(format!("{MOUNT}/cgroup.procs"), "1\n");
        fs
    }

    /// A group as the kernel would materialize it: directory plus interface
    /// files.
    fn seed_group(fs: &MockFs, name: &str) {
        let base = format!("{MOUNT}/{name}");
        fs.add_dir(&base);
        for file in [
            "cgroup.procs",
            "cpu.max",
            "cpu.weight",
            "cpu.stat",
            "memory.max",
            "memory.high",
            "memory.current",
            "memory.events",
            "io.max",
            "io.stat",
        ] {
            fs.add_file(format!("{base}/{file}"), "");
        }
    }

    fn controller(fs: &MockFs) -> CgroupController<MockFs> {
        CgroupController::new(fs.clone(), MOUNT)
    }

    #[test]
    fn test_availability_probe() {
        let ctl = controller(&v2_fs());
        assert!(ctl.is_available());
        let ctl = controller(&MockFs::new());
        assert!(!ctl.is_available());
        assert!(matches!(
            ctl.create("g"),
            Err(CgroupError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_create_and_duplicate() {
        let fs = v2_fs();
        let ctl = controller(&fs);
        let handle = ctl.create("exp-1").unwrap();
        assert_eq!(handle.name, "exp-1");
        assert_eq!(handle.path, PathBuf::from("/sys/fs/cgroup/exp-1"));
        assert!(ctl.exists("exp-1"));
        assert!(matches!(
            ctl.create("exp-1"),
            Err(CgroupError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_delete_requires_existence_and_drain() {
        let fs = v2_fs();
        let ctl = controller(&fs);
        assert!(matches!(ctl.delete("ghost"), Err(CgroupError::NotExists(_))));

        seed_group(&fs, "busy");
        fs.add_file(format!("{MOUNT}/busy/cgroup.procs"), "4242\n4243\n");
        assert!(matches!(ctl.delete("busy"), Err(CgroupError::NotEmpty(_))));
        // the populated group was not touched
        assert!(ctl.exists("busy"));

        fs.add_file(format!("{MOUNT}/busy/cgroup.procs"), "");
        ctl.delete("busy").unwrap();
        assert!(!ctl.exists("busy"));
    }

    #[test]
    fn test_member_pids() {
        let fs = v2_fs();
        seed_group(&fs, "g");
        fs.add_file(format!("{MOUNT}/g/cgroup.procs"), "10\n20\n");
        let ctl = controller(&fs);
        assert_eq!(ctl.member_pids("g").unwrap(), vec![10, 20]);
    }

    #[test]
    fn test_add_and_remove_process() {
        let fs = v2_fs();
        seed_group(&fs, "g");
        let ctl = controller(&fs);
        ctl.add_process("g", 555).unwrap();
        assert_eq!(fs.file_content(format!("{MOUNT}/g/cgroup.procs")).unwrap(), "555");
        ctl.remove_process("g", 555).unwrap();
        assert_eq!(fs.file_content(format!("{MOUNT}/cgroup.procs")).unwrap(), "555");
        assert!(matches!(
            ctl.add_process("ghost", 1),
            Err(CgroupError::NotExists(_))
        ));
    }

    #[test]
    fn test_set_cpu_limit_formats() {
        let fs = v2_fs();
        seed_group(&fs, "g");
        let ctl = controller(&fs);
        ctl.set_cpu_limit("g", Some(50_000), 100_000).unwrap();
        assert_eq!(fs.file_content(format!("{MOUNT}/g/cpu.max")).unwrap(), "50000 100000");
        ctl.set_cpu_limit("g", None, 100_000).unwrap();
        assert_eq!(fs.file_content(format!("{MOUNT}/g/cpu.max")).unwrap(), "max 100000");
        assert!(matches!(
            ctl.set_cpu_limit("g", Some(0), 100_000),
            Err(CgroupError::InvalidValue(_))
        ));
        assert!(matches!(
            ctl.set_cpu_limit("g", Some(1000), 0),
            Err(CgroupError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_set_cpu_weight_domain() {
        let fs = v2_fs();
        seed_group(&fs, "g");
        let ctl = controller(&fs);
        ctl.set_cpu_weight("g", 1).unwrap();
        ctl.set_cpu_weight("g", 10000).unwrap();
        assert!(matches!(
            ctl.set_cpu_weight("g", 0),
            Err(CgroupError::InvalidValue(_))
        ));
        assert!(matches!(
            ctl.set_cpu_weight("g", 10001),
            Err(CgroupError::InvalidValue(_))
        ));
        // rejected values never reach the filesystem
        assert_eq!(fs.file_content(format!("{MOUNT}/g/cpu.weight")).unwrap(), "10000");
    }

    #[test]
    fn test_memory_limits() {
        let fs = v2_fs();
        seed_group(&fs, "g");
        let ctl = controller(&fs);
        ctl.set_memory_max("g", 104_857_600).unwrap();
        ctl.set_memory_high("g", 94_371_840).unwrap();
        assert_eq!(fs.file_content(format!("{MOUNT}/g/memory.max")).unwrap(), "104857600");
        assert_eq!(fs.file_content(format!("{MOUNT}/g/memory.high")).unwrap(), "94371840");
    }

    #[test]
    fn test_set_io_max() {
        let fs = v2_fs();
        seed_group(&fs, "g");
        let ctl = controller(&fs);
        ctl.set_io_max("g", "8:0", 1_048_576, 2_097_152).unwrap();
        assert_eq!(
            fs.file_content(format!("{MOUNT}/g/io.max")).unwrap(),
            "8:0 rbps=1048576 wbps=2097152"
        );
        ctl.set_io_max("g", "8:0", 0, 2_097_152).unwrap();
        assert_eq!(
            fs.file_content(format!("{MOUNT}/g/io.max")).unwrap(),
            "8:0 rbps=max wbps=2097152"
        );
        assert!(matches!(
            ctl.set_io_max("g", "sda", 1, 1),
            Err(CgroupError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_write_rejected_surfaces_kernel_error() {
        let fs = v2_fs();
        seed_group(&fs, "g");
        fs.deny_writes(format!("{MOUNT}/g/memory.max"));
        let ctl = controller(&fs);
        match ctl.set_memory_max("g", 1024) {
            Err(CgroupError::WriteRejected { file, .. }) => {
                assert_eq!(file, PathBuf::from("/sys/fs/cgroup/g/memory.max"));
            }
            other => panic!("expected WriteRejected, got {other:?}"),
        }
    }

    #[test]
    fn test_counters() {
        let fs = v2_fs();
        seed_group(&fs, "g");
        fs.add_file(
            format!("{MOUNT}/g/cpu.stat"),
            "usage_usec 900\nuser_usec 600\nsystem_usec 300\nnr_throttled 4\nthrottled_usec 250\n",
        );
        fs.add_file(format!("{MOUNT}/g/memory.current"), "52428800\n");
        fs.add_file(format!("{MOUNT}/g/memory.events"), "low 0\noom 1\noom_kill 1\n");
        fs.add_file(
            format!("{MOUNT}/g/io.stat"),
            "8:0 rbytes=100 wbytes=200 rios=1 wios=2 dbytes=0 dios=0\n",
        );
        let ctl = controller(&fs);
        assert_eq!(ctl.cpu_usage_usec("g").unwrap(), 900);
        assert_eq!(ctl.cpu_stat("g").unwrap().nr_throttled, 4);
        assert_eq!(ctl.memory_current("g").unwrap(), 52428800);
        assert_eq!(ctl.oom_kill_count("g").unwrap(), 1);
        assert_eq!(ctl.io_totals("g").unwrap(), (100, 200));
        assert!(matches!(
            ctl.memory_current("ghost"),
            Err(CgroupError::NotExists(_))
        ));
    }
}

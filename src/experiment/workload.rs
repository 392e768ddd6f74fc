//! Workload processes: what experiments run inside (or outside) a cgroup.
//!
//! Built-in workloads re-exec the current binary with a hidden subcommand,
//! so every child is a real OS process the kernel can account and kill.

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::info;

/// Block size used by the I/O writer, matching the page-sized writes the
/// io controller meters.
const IO_BLOCK_SIZE: usize = 4096;

const MB: usize = 1024 * 1024;

/// A workload an experiment can spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    /// Busy-loop arithmetic for a wall-clock duration.
    CpuSpin { seconds: u64 },
    /// Allocate and touch memory in 1 MiB steps, then hold it.
    MemoryAlloc { target_mb: u64, hold_secs: u64 },
    /// Append 4 KiB blocks to a file for a wall-clock duration.
    IoWrite { path: PathBuf, seconds: u64 },
    /// Any external command.
    Command { program: String, args: Vec<String> },
}

impl Workload {
    /// Spawns the workload as a child process with stdio detached.
    pub fn spawn(&self) -> io::Result<WorkloadChild> {
        let mut cmd = match self {
            Workload::CpuSpin { seconds } => {
                let mut cmd = Command::new(std::env::current_exe()?);
                cmd.args(["workload", "cpu-spin", "--seconds", &seconds.to_string()]);
                cmd
            }
            Workload::MemoryAlloc { target_mb, hold_secs } => {
                let mut cmd = Command::new(std::env::current_exe()?);
                cmd.args([
                    "workload",
                    "memory-alloc",
                    "--target-mb",
                    &target_mb.to_string(),
                    "--hold-secs",
                    &hold_secs.to_string(),
                ]);
                cmd
            }
            Workload::IoWrite { path, seconds } => {
                let mut cmd = Command::new(std::env::current_exe()?);
                cmd.arg("workload").arg("io-write").arg("--path").arg(path);
                cmd.args(["--seconds", &seconds.to_string()]);
                cmd
            }
            Workload::Command { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        };
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(WorkloadChild { child })
    }
}

/// How a workload ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Killed(i32),
}

impl Termination {
    /// A SIGKILL death is how the kernel OOM killer presents itself.
    pub fn is_sigkill(&self) -> bool {
        matches!(self, Termination::Killed(sig) if *sig == libc::SIGKILL)
    }
}

fn classify(status: ExitStatus) -> Termination {
    match status.code() {
        Some(code) => Termination::Exited(code),
        None => Termination::Killed(status.signal().unwrap_or(0)),
    }
}

/// A spawned workload process.
#[derive(Debug)]
pub struct WorkloadChild {
    child: Child,
}

impl WorkloadChild {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking liveness check. `Some` once the child has ended.
    pub fn poll(&mut self) -> io::Result<Option<Termination>> {
        Ok(self.child.try_wait()?.map(classify))
    }

    /// Blocks until the child ends and reaps it.
    pub fn reap(&mut self) -> io::Result<Termination> {
        Ok(classify(self.child.wait()?))
    }

    /// Kills the child and reaps it. Idempotent on an already-dead child.
    pub fn force_terminate(&mut self) -> io::Result<Termination> {
        // kill on an exited-but-unreaped child is a no-op signal to a zombie
        let _ = self.child.kill();
        self.reap()
    }
}

/// Body of `workload cpu-spin`.
pub fn run_cpu_spin(seconds: u64) -> i32 {
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut sum: i64 = 0;
    while Instant::now() < deadline {
        for j in 0..1_000_000i64 {
            sum = sum.wrapping_add(std::hint::black_box(j.wrapping_mul(j)));
        }
    }
    std::hint::black_box(sum);
    0
}

/// Body of `workload memory-alloc`: grow in touched 1 MiB chunks with a
/// short pause between steps so the parent can watch usage climb, then hold.
/// Exits 1 if an allocation is refused before the kernel intervenes.
pub fn run_memory_alloc(target_mb: u64, hold_secs: u64) -> i32 {
    let mut chunks: Vec<Vec<u8>> = Vec::with_capacity(target_mb as usize);
    for step in 0..target_mb {
        let mut chunk: Vec<u8> = Vec::new();
        if chunk.try_reserve_exact(MB).is_err() {
            info!(allocated_mb = step, "allocation refused");
            return 1;
        }
        // Touch every page so the charge is real, not just address space.
        chunk.resize(MB, 0xAB);
        chunks.push(chunk);
        std::thread::sleep(Duration::from_millis(100));
    }
    info!(allocated_mb = target_mb, "allocation target reached");
    std::thread::sleep(Duration::from_secs(hold_secs));
    drop(chunks);
    0
}

/// Body of `workload io-write`: stream fixed-size blocks into a file until
/// the deadline. Exits 1 when the file cannot be created or written.
pub fn run_io_write(path: &PathBuf, seconds: u64) -> i32 {
    let Ok(mut file) = File::create(path) else {
        return 1;
    };
    let block = [0xABu8; IO_BLOCK_SIZE];
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut total: u64 = 0;
    while Instant::now() < deadline {
        match file.write(&block) {
            Ok(n) => total += n as u64,
            Err(_) => return 1,
        }
    }
    info!(bytes = total, "write workload finished");
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> WorkloadChild {
        Workload::Command {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
        .spawn()
        .unwrap()
    }

    #[test]
    fn test_exit_zero() {
        let mut child = shell("exit 0");
        assert_eq!(child.reap().unwrap(), Termination::Exited(0));
    }

    #[test]
    fn test_exit_code_preserved() {
        let mut child = shell("exit 3");
        assert_eq!(child.reap().unwrap(), Termination::Exited(3));
    }

    #[test]
    fn test_sigkill_classified() {
        let mut child = shell("kill -KILL $$");
        let term = child.reap().unwrap();
        assert_eq!(term, Termination::Killed(libc::SIGKILL));
        assert!(term.is_sigkill());
    }

    #[test]
    fn test_sigterm_is_not_sigkill() {
        let mut child = shell("kill -TERM $$");
        let term = child.reap().unwrap();
        assert_eq!(term, Termination::Killed(libc::SIGTERM));
        assert!(!term.is_sigkill());
    }

    #[test]
    fn test_poll_then_force_terminate() {
        let mut child = shell("sleep 30");
        assert_eq!(child.poll().unwrap(), None);
        let term = child.force_terminate().unwrap();
        assert!(term.is_sigkill());
        // idempotent after death
        assert!(child.force_terminate().is_ok() || child.poll().is_ok());
    }

    #[test]
    fn test_run_cpu_spin_returns() {
        assert_eq!(run_cpu_spin(0), 0);
    }

    #[test]
    fn test_run_io_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io.dat");
        assert_eq!(run_io_write(&path, 0), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_run_io_write_bad_path() {
        assert_eq!(run_io_write(&PathBuf::from("/nonexistent/dir/io.dat"), 0), 1);
    }

    #[test]
    fn test_run_memory_alloc_small() {
        assert_eq!(run_memory_alloc(2, 0), 0);
    }
}

//! `ExperimentSession`: runs controlled experiments end to end — group
//! setup, workload spawn, sampling loop, classification and cleanup.
//!
//! Cleanup discipline: a failure before the workload starts aborts the
//! experiment; any failure while the workload runs, the record sink's
//! included, kills the child and removes the group; a limit failure after a
//! baseline phase degrades to a warning; a failed removal at the end is only
//! warned about, never masks the result.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::cgroup::{CgroupController, CgroupError};
use crate::collector::procfs::{ProcSampler, SampleError};
use crate::collector::rates;
use crate::collector::snapshot::ProcessSnapshot;
use crate::collector::traits::FileSystem;
use crate::experiment::workload::{Termination, Workload, WorkloadChild};
use crate::experiment::{ExperimentConfig, ExperimentResult};
use crate::sink::{CgroupSample, RecordSink};
use crate::util::timestamp_ms;

const MIB: u64 = 1024 * 1024;

/// How far past the requested limit the memory workload tries to allocate.
const MEMORY_OVERSHOOT_MB: u64 = 50;

/// How long the memory workload holds its allocation once reached.
const MEMORY_HOLD_SECS: u64 = 5;

/// Iterations between counter reads in the monitored overhead phase.
const OVERHEAD_SAMPLE_STRIDE: u64 = 10_000;

/// Errors from experiment orchestration.
#[derive(Debug)]
pub enum ExperimentError {
    Cgroup(CgroupError),
    Sample(SampleError),
    /// Spawning or waiting on the workload process failed.
    Workload(io::Error),
    /// The record sink refused a write.
    Sink(io::Error),
    /// A parameter failed validation before anything was touched.
    InvalidArgument(String),
}

impl fmt::Display for ExperimentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentError::Cgroup(e) => write!(f, "cgroup operation failed: {e}"),
            ExperimentError::Sample(e) => write!(f, "sampling failed: {e}"),
            ExperimentError::Workload(e) => write!(f, "workload process error: {e}"),
            ExperimentError::Sink(e) => write!(f, "record sink error: {e}"),
            ExperimentError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl Error for ExperimentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExperimentError::Cgroup(e) => Some(e),
            ExperimentError::Sample(e) => Some(e),
            ExperimentError::Workload(e) | ExperimentError::Sink(e) => Some(e),
            ExperimentError::InvalidArgument(_) => None,
        }
    }
}

impl From<CgroupError> for ExperimentError {
    fn from(e: CgroupError) -> Self {
        ExperimentError::Cgroup(e)
    }
}

impl From<SampleError> for ExperimentError {
    fn from(e: SampleError) -> Self {
        ExperimentError::Sample(e)
    }
}

/// Per-phase accumulator for averaged percentages.
#[derive(Debug, Default, Clone, Copy)]
struct Phase {
    sum: f64,
    samples: u32,
}

impl Phase {
    fn avg(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum / self.samples as f64
        }
    }
}

/// Per-phase I/O measurement from the group's own `io.stat`.
#[derive(Debug, Default, Clone, Copy)]
struct IoPhase {
    write_bytes: u64,
    samples: u32,
}

/// Owns a sampler, a cgroup controller and a record sink, and runs the
/// experiments against them.
pub struct ExperimentSession<F: FileSystem + Clone, S: RecordSink> {
    sampler: ProcSampler<F>,
    cgroups: CgroupController<F>,
    sink: S,
    config: ExperimentConfig,
}

impl<F: FileSystem + Clone, S: RecordSink> ExperimentSession<F, S> {
    pub fn new(
        fs: F,
        proc_path: impl Into<PathBuf>,
        cgroup_mount: impl Into<PathBuf>,
        sink: S,
        config: ExperimentConfig,
    ) -> Self {
        Self {
            sampler: ProcSampler::new(fs.clone(), proc_path),
            cgroups: CgroupController::new(fs, cgroup_mount),
            sink,
            config,
        }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Measures the cost of sampling itself: the same arithmetic timed bare,
    /// then with a counter read every [`OVERHEAD_SAMPLE_STRIDE`] iterations.
    pub fn run_overhead(
        &mut self,
        samples: u32,
        iterations: u64,
    ) -> Result<ExperimentResult, ExperimentError> {
        let mut baseline_total = 0.0;
        let mut monitored_total = 0.0;

        for i in 0..samples {
            let secs = timed_spin(iterations);
            info!(sample = i + 1, secs, "baseline sample");
            baseline_total += secs;
        }
        for i in 0..samples {
            let secs = self.timed_spin_monitored(iterations);
            info!(sample = i + 1, secs, "monitored sample");
            monitored_total += secs;
        }

        let complete = samples > 0;
        let baseline_secs = if complete { baseline_total / samples as f64 } else { 0.0 };
        let monitored_secs = if complete { monitored_total / samples as f64 } else { 0.0 };
        let overhead_percent = if baseline_secs > 0.0 {
            (monitored_secs - baseline_secs) / baseline_secs * 100.0
        } else {
            0.0
        };

        self.finish(ExperimentResult::Overhead {
            baseline_secs,
            monitored_secs,
            overhead_percent,
            samples,
            complete,
        })
    }

    /// Runs the same CPU-bound workload twice, first unthrottled and then
    /// under a `cpu.max` quota of `limit_percent` of one CPU.
    pub fn run_cpu_throttle(
        &mut self,
        group: &str,
        limit_percent: u32,
        duration_secs: u64,
    ) -> Result<ExperimentResult, ExperimentError> {
        if !(1..=100).contains(&limit_percent) {
            return Err(ExperimentError::InvalidArgument(format!(
                "throttle percent {limit_percent} outside [1, 100]"
            )));
        }
        self.cgroups.create(group)?;

        info!(group, duration_secs, "cpu throttle: unthrottled phase");
        let unthrottled = match self.cpu_phase(None, duration_secs) {
            Ok(phase) => phase,
            Err(err) => {
                self.cleanup_group(group);
                return Err(err);
            }
        };

        let period = self.config.cpu_period_usec;
        let quota = period * limit_percent as u64 / 100;
        if let Err(err) = self.cgroups.set_cpu_limit(group, Some(quota), period) {
            self.cleanup_group(group);
            return Err(err.into());
        }

        info!(group, limit_percent, "cpu throttle: throttled phase");
        let throttled = match self.cpu_phase(Some(group), duration_secs) {
            Ok(phase) => phase,
            Err(err) => {
                self.cleanup_group(group);
                return Err(err);
            }
        };

        let stat = self.cgroups.cpu_stat(group).unwrap_or_else(|err| {
            warn!(group, error = %err, "could not read cpu.stat");
            Default::default()
        });
        self.cleanup_group(group);

        let complete = unthrottled.samples > 0 && throttled.samples > 0;
        self.finish(ExperimentResult::CpuThrottle {
            limit_percent,
            unthrottled_avg_percent: unthrottled.avg(),
            throttled_avg_percent: throttled.avg(),
            nr_throttled: stat.nr_throttled,
            throttled_usec: stat.throttled_usec,
            samples: unthrottled.samples + throttled.samples,
            limit_effective: complete && throttled.avg() < unthrottled.avg(),
            complete,
        })
    }

    /// Caps a group at `limit_mb` and runs a child that allocates past the
    /// cap, watching `memory.current` until the kernel or the clock stops it.
    pub fn run_memory_limit(
        &mut self,
        group: &str,
        limit_mb: u64,
        max_duration_secs: u64,
    ) -> Result<ExperimentResult, ExperimentError> {
        if limit_mb == 0 {
            return Err(ExperimentError::InvalidArgument(
                "memory limit must be positive".into(),
            ));
        }
        let limit_bytes = limit_mb * MIB;
        self.cgroups.create(group)?;
        if let Err(err) = self.cgroups.set_memory_max(group, limit_bytes) {
            self.cleanup_group(group);
            return Err(err.into());
        }
        let oom_before = self.cgroups.oom_kill_count(group).unwrap_or(0);

        let workload = Workload::MemoryAlloc {
            target_mb: limit_mb + MEMORY_OVERSHOOT_MB,
            hold_secs: MEMORY_HOLD_SECS,
        };
        let mut child = match workload.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.cleanup_group(group);
                return Err(ExperimentError::Workload(err));
            }
        };
        if let Err(err) = self.cgroups.add_process(group, child.pid()) {
            let _ = child.force_terminate();
            self.cleanup_group(group);
            return Err(err.into());
        }
        info!(group, limit_mb, pid = child.pid(), "memory limit: child attached");

        let (peak_bytes, samples, termination) =
            match self.watch_memory(group, max_duration_secs, &mut child) {
                Ok(outcome) => outcome,
                Err(err) => {
                    let _ = child.force_terminate();
                    self.cleanup_group(group);
                    return Err(err);
                }
            };
        if termination.is_none() {
            // our kill, not the kernel's; never counted as OOM
            let _ = child.force_terminate();
        }

        let oom_after = self.cgroups.oom_kill_count(group).unwrap_or(oom_before);
        let oom_occurred = classify_oom(termination, oom_before, oom_after);
        self.cleanup_group(group);

        self.finish(ExperimentResult::MemoryLimit {
            limit_bytes,
            peak_bytes,
            oom_occurred,
            limit_enforced: peak_bytes <= limit_bytes + self.config.memory_tolerance_bytes,
            samples,
            complete: samples > 0,
        })
    }

    /// Streams writes from inside a group with and without an `io.max`
    /// write cap, measuring throughput from the group's own `io.stat`.
    pub fn run_io_limit(
        &mut self,
        group: &str,
        limit_mbps: u64,
        duration_secs: u64,
        device_id: Option<&str>,
    ) -> Result<ExperimentResult, ExperimentError> {
        if limit_mbps == 0 {
            return Err(ExperimentError::InvalidArgument(
                "write limit must be positive".into(),
            ));
        }
        let device = self.resolve_device_id(device_id);
        self.cgroups.create(group)?;

        info!(group, duration_secs, "io limit: baseline phase");
        let scratch = scratch_path("baseline");
        let baseline = self.io_phase(group, duration_secs, scratch.clone());
        let _ = std::fs::remove_file(&scratch);
        let baseline = match baseline {
            Ok(phase) => phase,
            Err(err) => {
                self.cleanup_group(group);
                return Err(err);
            }
        };

        let limit_bps = limit_mbps * MIB;
        if let Err(err) = self.cgroups.set_io_max(group, &device, 0, limit_bps) {
            // baseline already paid for; report an unthrottled comparison
            warn!(group, device, error = %err, "could not set io.max, continuing unlimited");
        }

        info!(group, limit_mbps, device, "io limit: limited phase");
        let scratch = scratch_path("limited");
        let limited = self.io_phase(group, duration_secs, scratch.clone());
        let _ = std::fs::remove_file(&scratch);
        self.cleanup_group(group);
        let limited = limited?;

        let window = duration_secs.max(1) as f64;
        let baseline_write_bps = baseline.write_bytes as f64 / window;
        let limited_write_bps = limited.write_bytes as f64 / window;
        let slowdown_percent = if baseline_write_bps > 0.0 {
            (baseline_write_bps - limited_write_bps) / baseline_write_bps * 100.0
        } else {
            0.0
        };

        self.finish(ExperimentResult::IoLimit {
            limit_write_bps: limit_bps,
            baseline_write_bps,
            limited_write_bps,
            slowdown_percent,
            samples: baseline.samples + limited.samples,
            complete: baseline.samples > 0 && limited.samples > 0,
        })
    }

    /// One CPU measurement phase: spawn the spinner, optionally attach it,
    /// and average its CPU percent over wall-clock windows until it ends.
    fn cpu_phase(
        &mut self,
        group: Option<&str>,
        duration_secs: u64,
    ) -> Result<Phase, ExperimentError> {
        let mut child = Workload::CpuSpin {
            seconds: duration_secs,
        }
        .spawn()
        .map_err(ExperimentError::Workload)?;
        if let Some(name) = group
            && let Err(err) = self.cgroups.add_process(name, child.pid())
        {
            let _ = child.force_terminate();
            return Err(err.into());
        }

        // the spinner never outlives its phase, failed sampling included
        let watched = self.watch_cpu(group, duration_secs, &mut child);
        let _ = child.force_terminate();
        watched
    }

    fn watch_cpu(
        &mut self,
        group: Option<&str>,
        duration_secs: u64,
        child: &mut WorkloadChild,
    ) -> Result<Phase, ExperimentError> {
        let mut phase = Phase::default();
        let mut prev: Option<(ProcessSnapshot, Instant)> = None;
        if let Ok(snap) = self.sampler.sample_process(child.pid()) {
            prev = Some((snap, Instant::now()));
        }
        let deadline =
            Instant::now() + Duration::from_secs(duration_secs) + self.config.sample_interval;
        loop {
            std::thread::sleep(self.config.sample_interval);
            match self.sampler.sample_process(child.pid()) {
                Ok(curr) => {
                    let now = Instant::now();
                    if let Some((prev_snap, prev_t)) = &prev {
                        let pct = rates::process_cpu_percent(
                            prev_snap,
                            &curr,
                            now.duration_since(*prev_t).as_secs_f64(),
                        );
                        phase.sum += pct;
                        phase.samples += 1;
                    }
                    prev = Some((curr, now));
                    if let Some(name) = group {
                        self.emit_cgroup_sample(name)?;
                    }
                }
                Err(SampleError::ProcessNotFound(_)) => break,
                Err(err) => warn!(error = %err, "process sample failed, skipping tick"),
            }
            if child.poll().map_err(ExperimentError::Workload)?.is_some() {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(phase)
    }

    /// Samples `memory.current` until the child ends or the deadline passes.
    /// Returns the peak, the sample count and how the child ended (`None`
    /// when the deadline won). The caller owns termination and cleanup.
    fn watch_memory(
        &mut self,
        group: &str,
        max_duration_secs: u64,
        child: &mut WorkloadChild,
    ) -> Result<(u64, u32, Option<Termination>), ExperimentError> {
        let mut peak_bytes = 0u64;
        let mut samples = 0u32;
        let deadline = Instant::now() + Duration::from_secs(max_duration_secs);
        loop {
            std::thread::sleep(self.config.sample_interval);
            match self.cgroups.memory_current(group) {
                Ok(current) => {
                    peak_bytes = peak_bytes.max(current);
                    samples += 1;
                    self.emit_cgroup_sample(group)?;
                }
                Err(err) => warn!(group, error = %err, "memory sample failed"),
            }
            if let Some(term) = child.poll().map_err(ExperimentError::Workload)? {
                return Ok((peak_bytes, samples, Some(term)));
            }
            if Instant::now() >= deadline {
                return Ok((peak_bytes, samples, None));
            }
        }
    }

    /// One I/O measurement phase inside the group: the write-bytes delta of
    /// the group's `io.stat` over the workload's lifetime.
    fn io_phase(
        &mut self,
        group: &str,
        duration_secs: u64,
        path: PathBuf,
    ) -> Result<IoPhase, ExperimentError> {
        let (_, write_before) = self.cgroups.io_totals(group).unwrap_or((0, 0));
        let mut child = Workload::IoWrite {
            path,
            seconds: duration_secs,
        }
        .spawn()
        .map_err(ExperimentError::Workload)?;
        if let Err(err) = self.cgroups.add_process(group, child.pid()) {
            let _ = child.force_terminate();
            return Err(err.into());
        }

        let watched = self.watch_io(group, duration_secs, &mut child);
        let _ = child.force_terminate();
        let samples = watched?;

        let (_, write_after) = self.cgroups.io_totals(group).unwrap_or((0, write_before));
        Ok(IoPhase {
            write_bytes: write_after.saturating_sub(write_before),
            samples,
        })
    }

    fn watch_io(
        &mut self,
        group: &str,
        duration_secs: u64,
        child: &mut WorkloadChild,
    ) -> Result<u32, ExperimentError> {
        let mut samples = 0u32;
        let deadline =
            Instant::now() + Duration::from_secs(duration_secs) + self.config.sample_interval;
        loop {
            std::thread::sleep(self.config.sample_interval);
            self.emit_cgroup_sample(group)?;
            samples += 1;
            if child.poll().map_err(ExperimentError::Workload)?.is_some() {
                return Ok(samples);
            }
            if Instant::now() >= deadline {
                return Ok(samples);
            }
        }
    }

    fn resolve_device_id(&self, explicit: Option<&str>) -> String {
        if let Some(id) = explicit {
            return id.to_string();
        }
        match self.sampler.detect_block_device() {
            Some(dev) => dev.device_id(),
            None => {
                warn!("no block device detected, assuming 8:0");
                "8:0".to_string()
            }
        }
    }

    /// Best-effort counter snapshot of the group for the record stream.
    fn emit_cgroup_sample(&mut self, group: &str) -> Result<(), ExperimentError> {
        let cpu_usage_usec = self.cgroups.cpu_usage_usec(group).unwrap_or(0);
        let memory_current_bytes = self.cgroups.memory_current(group).unwrap_or(0);
        let (io_read_bytes, io_write_bytes) = self.cgroups.io_totals(group).unwrap_or((0, 0));
        self.sink
            .cgroup_sample(&CgroupSample {
                timestamp_ms: timestamp_ms(),
                group: group.to_string(),
                cpu_usage_usec,
                memory_current_bytes,
                io_read_bytes,
                io_write_bytes,
            })
            .map_err(ExperimentError::Sink)
    }

    /// Removal failures at the end of a run are logged, never fatal.
    fn cleanup_group(&self, group: &str) {
        if let Err(err) = self.cgroups.delete(group) {
            warn!(group, error = %err, "could not remove cgroup");
        }
    }

    fn finish(&mut self, result: ExperimentResult) -> Result<ExperimentResult, ExperimentError> {
        self.sink
            .experiment_summary(&result)
            .map_err(ExperimentError::Sink)?;
        info!(kind = result.kind(), complete = result.is_complete(), "experiment finished");
        Ok(result)
    }

    fn timed_spin_monitored(&self, iterations: u64) -> f64 {
        let start = Instant::now();
        let mut sum: i64 = 0;
        for j in 0..iterations {
            sum = sum.wrapping_add(std::hint::black_box((j as i64).wrapping_mul(j as i64)));
            if j % OVERHEAD_SAMPLE_STRIDE == 0 {
                let _ = self.sampler.sample_system_cpu();
            }
        }
        std::hint::black_box(sum);
        start.elapsed().as_secs_f64()
    }
}

/// Whether the kernel OOM killer ended a memory-limited child. A SIGKILL
/// death is its signature; the `oom_kill` counter corroborates it and still
/// catches a kill whose exit status was lost to a reap race.
fn classify_oom(termination: Option<Termination>, oom_before: u64, oom_after: u64) -> bool {
    termination.is_some_and(|t| t.is_sigkill()) || oom_after > oom_before
}

fn timed_spin(iterations: u64) -> f64 {
    let start = Instant::now();
    let mut sum: i64 = 0;
    for j in 0..iterations {
        sum = sum.wrapping_add(std::hint::black_box((j as i64).wrapping_mul(j as i64)));
    }
    std::hint::black_box(sum);
    start.elapsed().as_secs_f64()
}

fn scratch_path(phase: &str) -> PathBuf {
    std::env::temp_dir().join(format!("cglab-io-{}-{}.dat", std::process::id(), phase))
}

//! Bounded per-pid monitoring: one record per interval until the duration
//! elapses, the process exits, or the stop flag is raised.

use std::error::Error;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::collector::procfs::{ProcSampler, SampleError};
use crate::collector::rates;
use crate::collector::traits::FileSystem;
use crate::sink::{ProcessSample, RecordSink};
use crate::util::timestamp_ms;

#[derive(Debug)]
pub enum MonitorError {
    Sample(SampleError),
    Sink(io::Error),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Sample(e) => write!(f, "monitor sampling failed: {e}"),
            MonitorError::Sink(e) => write!(f, "monitor record sink error: {e}"),
        }
    }
}

impl Error for MonitorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MonitorError::Sample(e) => Some(e),
            MonitorError::Sink(e) => Some(e),
        }
    }
}

impl From<SampleError> for MonitorError {
    fn from(e: SampleError) -> Self {
        MonitorError::Sample(e)
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub pid: u32,
    pub duration_secs: u64,
    pub interval: Duration,
}

/// What a finished monitoring run measured.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MonitorSummary {
    pub samples: u32,
    pub avg_cpu_percent: f64,
    pub peak_rss_pages: i64,
    /// True when the run ended because the process exited.
    pub process_exited: bool,
}

/// Monitors one existing process, emitting a [`ProcessSample`] per good tick.
///
/// Each tick reads the system CPU counters first and derives the process
/// percentage against that same window. A transient read failure skips the
/// tick and keeps the previous snapshots, so the next good tick still gets a
/// correct (longer) window. The process disappearing ends the run normally.
pub fn monitor_process<F: FileSystem, S: RecordSink>(
    sampler: &ProcSampler<F>,
    sink: &mut S,
    config: &MonitorConfig,
    running: &AtomicBool,
) -> Result<MonitorSummary, MonitorError> {
    let pid = config.pid;
    let mut prev_sys = sampler.sample_system_cpu()?;
    let mut prev_proc = sampler.sample_process(pid)?;
    let mut prev_t = Instant::now();

    let mut summary = MonitorSummary::default();
    let mut cpu_total = 0.0;
    let deadline = Instant::now() + Duration::from_secs(config.duration_secs);

    info!(pid, duration_secs = config.duration_secs, "monitoring started");
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        interruptible_sleep(config.interval, running);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        // system window first, then the process inside it
        let sys = match sampler.sample_system_cpu() {
            Ok(snap) => snap,
            Err(err) => {
                warn!(error = %err, "system sample failed, skipping tick");
                continue;
            }
        };
        let proc = match sampler.sample_process(pid) {
            Ok(snap) => snap,
            Err(SampleError::ProcessNotFound(_)) => {
                info!(pid, "process exited, monitoring stopped");
                summary.process_exited = true;
                break;
            }
            Err(err) => {
                warn!(error = %err, "process sample failed, skipping tick");
                continue;
            }
        };
        let now = Instant::now();
        let elapsed = now.duration_since(prev_t).as_secs_f64();

        let cpu_percent = rates::process_cpu_percent_of_system(&prev_proc, &proc, &prev_sys, &sys);
        let record = ProcessSample {
            timestamp_ms: timestamp_ms(),
            pid,
            cpu_percent,
            utime_ticks: proc.utime_ticks,
            stime_ticks: proc.stime_ticks,
            vsize_bytes: proc.vsize_bytes,
            rss_pages: proc.rss_pages,
            threads: proc.threads,
            minflt: proc.minflt,
            majflt: proc.majflt,
            vm_swap_kb: proc.vm_swap_kb,
            voluntary_ctxt_switches: proc.voluntary_ctxt_switches,
            nonvoluntary_ctxt_switches: proc.nonvoluntary_ctxt_switches,
            io_read_bytes: proc.io_read_bytes,
            io_write_bytes: proc.io_write_bytes,
            read_bps: rates::byte_rate(prev_proc.io_read_bytes, proc.io_read_bytes, elapsed),
            write_bps: rates::byte_rate(prev_proc.io_write_bytes, proc.io_write_bytes, elapsed),
        };
        sink.process_sample(&record).map_err(MonitorError::Sink)?;

        summary.samples += 1;
        cpu_total += cpu_percent;
        summary.peak_rss_pages = summary.peak_rss_pages.max(proc.rss_pages);
        prev_sys = sys;
        prev_proc = proc;
        prev_t = now;
    }

    if summary.samples > 0 {
        summary.avg_cpu_percent = cpu_total / summary.samples as f64;
    }
    info!(pid, samples = summary.samples, "monitoring finished");
    Ok(summary)
}

/// Sleeps in short slices so a stop flag is honored promptly.
fn interruptible_sleep(duration: Duration, running: &AtomicBool) {
    let slice = Duration::from_millis(100).min(duration);
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(slice.min(deadline.saturating_duration_since(Instant::now())));
    }
}

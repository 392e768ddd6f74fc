//! cglab - resource telemetry and cgroup experiment driver.
//!
//! `monitor` streams per-process samples to CSV; `experiment` runs one of
//! the controlled cgroup experiments and appends a JSON summary line. The
//! hidden `workload` subcommand is how experiments re-exec this binary as
//! their child processes.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use cglab::collector::{ProcSampler, RealFs};
use cglab::experiment::{
    DEFAULT_CPU_PERIOD_USEC, DEFAULT_MEMORY_TOLERANCE_BYTES, ExperimentConfig, ExperimentSession,
    workload,
};
use cglab::cgroup::DEFAULT_CGROUP_MOUNT;
use cglab::monitor::{MonitorConfig, monitor_process};
use cglab::sink::CsvSink;
use cglab::util::unique_group_name;

/// Resource telemetry and cgroup v2 experiment driver.
#[derive(Parser)]
#[command(name = "cglab", about = "Resource telemetry and cgroup experiment driver", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc", global = true)]
    proc_path: String,

    /// Path to the cgroup v2 mount.
    #[arg(long, default_value = DEFAULT_CGROUP_MOUNT, global = true)]
    cgroup_path: String,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor one process, emitting a CSV sample per interval.
    Monitor {
        /// Pid to monitor.
        pid: u32,
        /// How long to monitor, in seconds.
        #[arg(short, long, default_value = "60")]
        duration: u64,
        /// Sampling interval in milliseconds.
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,
        /// Output CSV file (stdout when omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a controlled cgroup experiment.
    Experiment {
        #[command(subcommand)]
        kind: ExperimentCmd,
        /// Output file for samples and the summary line (stdout when omitted).
        #[arg(short, long, global = true)]
        output: Option<PathBuf>,
        /// Sampling interval in milliseconds.
        #[arg(long, default_value = "1000", global = true)]
        interval_ms: u64,
        /// Allowed overshoot when judging a memory limit, in MiB.
        #[arg(long, default_value_t = DEFAULT_MEMORY_TOLERANCE_BYTES / (1024 * 1024), global = true)]
        tolerance_mb: u64,
        /// Reference period for cpu.max quotas, in microseconds.
        #[arg(long, default_value_t = DEFAULT_CPU_PERIOD_USEC, global = true)]
        cpu_period_usec: u64,
    },
    /// Internal workload bodies; experiments spawn these.
    #[command(hide = true, subcommand)]
    Workload(WorkloadCmd),
}

#[derive(Subcommand)]
enum ExperimentCmd {
    /// Measure the timing overhead of sampling itself.
    Overhead {
        /// Timed repetitions per phase.
        #[arg(long, default_value = "10")]
        samples: u32,
        /// Arithmetic iterations per repetition.
        #[arg(long, default_value = "100000")]
        iterations: u64,
    },
    /// Verify cpu.max throttling against an unthrottled baseline.
    CpuThrottle {
        /// Bandwidth cap as a percentage of one CPU.
        #[arg(long, default_value = "50")]
        limit_percent: u32,
        /// Seconds per phase.
        #[arg(long, default_value = "10")]
        duration: u64,
    },
    /// Verify memory.max enforcement against an over-allocating child.
    MemoryLimit {
        /// Hard cap in MiB.
        #[arg(long, default_value = "100")]
        limit_mb: u64,
        /// Give up watching after this many seconds.
        #[arg(long, default_value = "30")]
        max_duration: u64,
    },
    /// Verify io.max write limiting against an unlimited baseline.
    IoLimit {
        /// Write cap in MiB/s.
        #[arg(long, default_value = "10")]
        limit_mbps: u64,
        /// Seconds per phase.
        #[arg(long, default_value = "10")]
        duration: u64,
        /// Target device as major:minor (auto-detected when omitted).
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkloadCmd {
    CpuSpin {
        #[arg(long)]
        seconds: u64,
    },
    MemoryAlloc {
        #[arg(long)]
        target_mb: u64,
        #[arg(long, default_value = "5")]
        hold_secs: u64,
    },
    IoWrite {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        seconds: u64,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("cglab={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn open_sink(output: Option<&PathBuf>) -> io::Result<CsvSink<Box<dyn Write>>> {
    let out: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    };
    Ok(CsvSink::new(out))
}

fn run_monitor(
    args: &Args,
    pid: u32,
    duration: u64,
    interval_ms: u64,
    output: Option<&PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let sampler = ProcSampler::new(RealFs::new(), &args.proc_path);
    let mut sink = open_sink(output)?;
    let config = MonitorConfig {
        pid,
        duration_secs: duration,
        interval: Duration::from_millis(interval_ms.max(1)),
    };
    let summary = monitor_process(&sampler, &mut sink, &config, &running)?;
    info!(
        samples = summary.samples,
        avg_cpu_percent = format!("{:.2}", summary.avg_cpu_percent),
        peak_rss_pages = summary.peak_rss_pages,
        "monitor summary"
    );
    Ok(())
}

fn run_experiment(
    args: &Args,
    kind: &ExperimentCmd,
    output: Option<&PathBuf>,
    interval_ms: u64,
    tolerance_mb: u64,
    cpu_period_usec: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ExperimentConfig {
        sample_interval: Duration::from_millis(interval_ms.max(1)),
        memory_tolerance_bytes: tolerance_mb * 1024 * 1024,
        cpu_period_usec,
    };
    let sink = open_sink(output)?;
    let mut session = ExperimentSession::new(
        RealFs::new(),
        &args.proc_path,
        &args.cgroup_path,
        sink,
        config,
    );

    let result = match kind {
        ExperimentCmd::Overhead { samples, iterations } => {
            session.run_overhead(*samples, *iterations)?
        }
        ExperimentCmd::CpuThrottle {
            limit_percent,
            duration,
        } => session.run_cpu_throttle(
            &unique_group_name("cpu-throttle"),
            *limit_percent,
            *duration,
        )?,
        ExperimentCmd::MemoryLimit {
            limit_mb,
            max_duration,
        } => session.run_memory_limit(&unique_group_name("memory-limit"), *limit_mb, *max_duration)?,
        ExperimentCmd::IoLimit {
            limit_mbps,
            duration,
            device,
        } => session.run_io_limit(
            &unique_group_name("io-limit"),
            *limit_mbps,
            *duration,
            device.as_deref(),
        )?,
    };
    info!(kind = result.kind(), "result: {}", serde_json::to_string(&result)?);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Workload children run before logging init: their stdio is discarded
    // by the parent anyway and they must not race the subscriber.
    if let Command::Workload(cmd) = &args.command {
        let code = match cmd {
            WorkloadCmd::CpuSpin { seconds } => workload::run_cpu_spin(*seconds),
            WorkloadCmd::MemoryAlloc {
                target_mb,
                hold_secs,
            } => workload::run_memory_alloc(*target_mb, *hold_secs),
            WorkloadCmd::IoWrite { path, seconds } => workload::run_io_write(path, *seconds),
        };
        return ExitCode::from(code as u8);
    }

    init_logging(args.verbose, args.quiet);
    info!("cglab {} starting", env!("CARGO_PKG_VERSION"));

    let outcome = match &args.command {
        Command::Monitor {
            pid,
            duration,
            interval_ms,
            output,
        } => run_monitor(&args, *pid, *duration, *interval_ms, output.as_ref()),
        Command::Experiment {
            kind,
            output,
            interval_ms,
            tolerance_mb,
            cpu_period_usec,
        } => run_experiment(
            &args,
            kind,
            output.as_ref(),
            *interval_ms,
            *tolerance_mb,
            *cpu_period_usec,
        ),
        Command::Workload(_) => unreachable!("handled above"),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

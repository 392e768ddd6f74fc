//! Controlled resource experiments: result types, tunables, workloads and
//! the session that drives them.

pub mod orchestrator;
pub mod workload;

use std::time::Duration;

use serde::Serialize;

pub use orchestrator::{ExperimentError, ExperimentSession};
pub use workload::{Termination, Workload, WorkloadChild};

/// Default `cpu.max` reference period, in microseconds.
pub const DEFAULT_CPU_PERIOD_USEC: u64 = 100_000;

/// Default slack allowed between a memory limit and the observed peak.
/// Page-cache accounting makes `memory.current` overshoot slightly.
pub const DEFAULT_MEMORY_TOLERANCE_BYTES: u64 = 5 * 1024 * 1024;

/// Tunables shared by all experiments.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Interval between counter samples while a workload runs.
    pub sample_interval: Duration,
    /// Allowed overshoot when judging whether a memory limit held.
    pub memory_tolerance_bytes: u64,
    /// Reference period for `cpu.max` quotas.
    pub cpu_period_usec: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            memory_tolerance_bytes: DEFAULT_MEMORY_TOLERANCE_BYTES,
            cpu_period_usec: DEFAULT_CPU_PERIOD_USEC,
        }
    }
}

/// Summary of one finished experiment.
///
/// Each variant carries only scalar findings. `complete` is false when the
/// run produced no samples to summarize, so consumers can tell "measured
/// zero" from "measured nothing".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "experiment", rename_all = "snake_case")]
pub enum ExperimentResult {
    /// Cost of sampling itself: the same computation timed bare and with
    /// periodic counter reads interleaved.
    Overhead {
        baseline_secs: f64,
        monitored_secs: f64,
        overhead_percent: f64,
        samples: u32,
        complete: bool,
    },
    /// CPU bandwidth limiting via `cpu.max`, unthrottled phase first.
    CpuThrottle {
        limit_percent: u32,
        unthrottled_avg_percent: f64,
        throttled_avg_percent: f64,
        nr_throttled: u64,
        throttled_usec: u64,
        samples: u32,
        limit_effective: bool,
        complete: bool,
    },
    /// Hard memory cap via `memory.max` against an over-allocating child.
    MemoryLimit {
        limit_bytes: u64,
        peak_bytes: u64,
        oom_occurred: bool,
        limit_enforced: bool,
        samples: u32,
        complete: bool,
    },
    /// Write-bandwidth cap via `io.max`, baseline phase first.
    IoLimit {
        limit_write_bps: u64,
        baseline_write_bps: f64,
        limited_write_bps: f64,
        slowdown_percent: f64,
        samples: u32,
        complete: bool,
    },
    /// Reserved for the namespace tooling that reports through the same
    /// channel; nothing in this crate constructs it.
    NamespaceIsolation {
        namespace_kind: String,
        isolated: bool,
        detail: String,
        complete: bool,
    },
}

impl ExperimentResult {
    /// Short name used in logs and filenames.
    pub fn kind(&self) -> &'static str {
        match self {
            ExperimentResult::Overhead { .. } => "overhead",
            ExperimentResult::CpuThrottle { .. } => "cpu-throttle",
            ExperimentResult::MemoryLimit { .. } => "memory-limit",
            ExperimentResult::IoLimit { .. } => "io-limit",
            ExperimentResult::NamespaceIsolation { .. } => "namespace-isolation",
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            ExperimentResult::Overhead { complete, .. }
            | ExperimentResult::CpuThrottle { complete, .. }
            | ExperimentResult::MemoryLimit { complete, .. }
            | ExperimentResult::IoLimit { complete, .. }
            | ExperimentResult::NamespaceIsolation { complete, .. } => *complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serializes_with_tag() {
        let result = ExperimentResult::MemoryLimit {
            limit_bytes: 104_857_600,
            peak_bytes: 105_000_000,
            oom_occurred: true,
            limit_enforced: true,
            samples: 12,
            complete: true,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"experiment\":\"memory_limit\""));
        assert!(json.contains("\"oom_occurred\":true"));
        assert_eq!(result.kind(), "memory-limit");
        assert!(result.is_complete());
    }

    #[test]
    fn test_default_config() {
        let config = ExperimentConfig::default();
        assert_eq!(config.sample_interval, Duration::from_secs(1));
        assert_eq!(config.memory_tolerance_bytes, 5 * 1024 * 1024);
        assert_eq!(config.cpu_period_usec, 100_000);
    }
}

//! Record output: flat CSV rows for samples, one JSON summary line per
//! experiment.

use std::io::{self, Write};

use serde::Serialize;

use crate::experiment::ExperimentResult;

/// One monitored-process sample row.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ProcessSample {
    pub timestamp_ms: i64,
    pub pid: u32,
    pub cpu_percent: f64,
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
    pub read_bps: f64,
    pub write_bps: f64,
}

/// One cgroup counter sample row taken during an experiment.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CgroupSample {
    pub timestamp_ms: i64,
    pub group: String,
    pub cpu_usage_usec: u64,
    pub memory_current_bytes: u64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
}

/// Where sample records and experiment summaries go.
pub trait RecordSink {
    fn process_sample(&mut self, sample: &ProcessSample) -> io::Result<()>;
    fn cgroup_sample(&mut self, sample: &CgroupSample) -> io::Result<()>;
    fn experiment_summary(&mut self, result: &ExperimentResult) -> io::Result<()>;
}

/// Discards everything. Useful in tests and for experiments where only the
/// summary matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn process_sample(&mut self, _sample: &ProcessSample) -> io::Result<()> {
        Ok(())
    }

    fn cgroup_sample(&mut self, _sample: &CgroupSample) -> io::Result<()> {
        Ok(())
    }

    fn experiment_summary(&mut self, _result: &ExperimentResult) -> io::Result<()> {
        Ok(())
    }
}

/// CSV writer. Each record kind gets its header once, before its first row;
/// summaries are JSON lines prefixed with `#` so CSV consumers skip them.
/// Every record is flushed immediately, so a killed run keeps its rows.
#[derive(Debug)]
pub struct CsvSink<W: Write> {
    out: W,
    wrote_process_header: bool,
    wrote_cgroup_header: bool,
}

const PROCESS_HEADER: &str = "timestamp_ms,pid,cpu_percent,utime_ticks,stime_ticks,\
vsize_bytes,rss_pages,threads,minflt,majflt,vm_swap_kb,voluntary_ctxt_switches,\
nonvoluntary_ctxt_switches,io_read_bytes,io_write_bytes,read_bps,write_bps";

const CGROUP_HEADER: &str =
    "timestamp_ms,group,cpu_usage_usec,memory_current_bytes,io_read_bytes,io_write_bytes";

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            wrote_process_header: false,
            wrote_cgroup_header: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn process_sample(&mut self, s: &ProcessSample) -> io::Result<()> {
        if !self.wrote_process_header {
            writeln!(self.out, "{PROCESS_HEADER}")?;
            self.wrote_process_header = true;
        }
        writeln!(
            self.out,
            "{},{},{:.2},{},{},{},{},{},{},{},{},{},{},{},{},{:.2},{:.2}",
            s.timestamp_ms,
            s.pid,
            s.cpu_percent,
            s.utime_ticks,
            s.stime_ticks,
            s.vsize_bytes,
            s.rss_pages,
            s.threads,
            s.minflt,
            s.majflt,
            s.vm_swap_kb,
            s.voluntary_ctxt_switches,
            s.nonvoluntary_ctxt_switches,
            s.io_read_bytes,
            s.io_write_bytes,
            s.read_bps,
            s.write_bps,
        )?;
        self.out.flush()
    }

    fn cgroup_sample(&mut self, s: &CgroupSample) -> io::Result<()> {
        if !self.wrote_cgroup_header {
            writeln!(self.out, "{CGROUP_HEADER}")?;
            self.wrote_cgroup_header = true;
        }
        writeln!(
            self.out,
            "{},{},{},{},{},{}",
            s.timestamp_ms,
            s.group,
            s.cpu_usage_usec,
            s.memory_current_bytes,
            s.io_read_bytes,
            s.io_write_bytes,
        )?;
        self.out.flush()
    }

    fn experiment_summary(&mut self, result: &ExperimentResult) -> io::Result<()> {
        let json = serde_json::to_string(result)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.out, "# {json}")?;
        self.out.flush()
    }
}

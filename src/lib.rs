//! cglab - Linux resource telemetry and control engine.
//!
//! Three cooperating layers:
//! - [`collector`]: `/proc` sampling into typed counter snapshots, plus the
//!   pure rate math that turns snapshot pairs into percentages and rates.
//! - [`cgroup`]: a cgroup v2 controller for transient groups — lifecycle,
//!   membership, cpu/memory/io limits and counter readback.
//! - [`experiment`]: orchestrated experiments that spawn real workload
//!   processes under those limits and summarize what the kernel did.
//!
//! All kernel access goes through the [`collector::FileSystem`] trait, so
//! every layer runs unchanged against an in-memory mock in tests.

pub mod cgroup;
pub mod collector;
pub mod experiment;
pub mod monitor;
pub mod sink;
pub mod util;

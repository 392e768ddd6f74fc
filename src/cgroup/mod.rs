//! cgroup v2 control: pure interface-file parsers plus the controller that
//! drives group lifecycle, membership and resource limits.

pub mod controller;
pub mod parser;

pub use controller::{CgroupController, CgroupError, CgroupHandle, DEFAULT_CGROUP_MOUNT};
pub use parser::CpuStat;

//! The sampling side: `/proc` readers, snapshot types and rate derivation.

pub mod mock;
pub mod procfs;
pub mod rates;
pub mod snapshot;
pub mod traits;

pub use procfs::{ProcSampler, SampleError};
pub use snapshot::{
    DeviceIoSnapshot, MemorySnapshot, NetworkIfSnapshot, ProcessSnapshot, SystemCpuSnapshot,
};
pub use traits::{FileSystem, RealFs};

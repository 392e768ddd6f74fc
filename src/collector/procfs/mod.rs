//! `/proc` sampling: pure text parsers plus the `ProcSampler` that binds
//! them to a [`FileSystem`](crate::collector::traits::FileSystem).

pub mod parser;
pub mod sampler;

pub use parser::ParseError;
pub use sampler::{ProcSampler, SampleError};

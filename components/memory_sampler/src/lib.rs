//! Peak memory sampling
//!
//! [`PeakMemorySampler`] polls a [`MemoryReader`] on a fixed interval and
//! keeps the maximum reading. [`ProcessMemoryReader`] reads the resident set
//! size of a process through `sysinfo`.

mod reader;
mod sampler;

pub use reader::{MemoryReader, ProcessMemoryReader};
pub use sampler::{PeakMemoryReport, PeakMemorySampler};

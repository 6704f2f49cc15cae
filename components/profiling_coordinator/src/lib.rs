//! Heap profiling session coordinator
//!
//! Binds heap instrumentation to a pipeline's two lifecycle events. At
//! before-run the coordinator enables a fresh protocol session and starts
//! the enabled modes (sampling profile, then allocation tracking; a heap
//! snapshot has no start step) and the peak memory sampler. At
//! after-completion it stops every mode, writes each artifact, disables the
//! session and logs the peak memory figure.
//!
//! Ordering within one cycle:
//!
//! 1. `HeapProfiler.enable` before any mode command
//! 2. mode start commands in [`ModeKind`](instrumentation::ModeKind) order
//! 3. each mode's artifact written after its stop command resolves
//! 4. `HeapProfiler.disable` after every mode has stopped
//!
//! A failing mode at after-completion does not keep the other modes from
//! stopping, the session from being disabled, or the peak memory from being
//! reported.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod hooks;

pub use config::{
    ProfilingConfig, ProfilingConfigBuilder, ProfilingOptions, DEFAULT_PEAK_MEMORY_INTERVAL_MS,
};
pub use coordinator::{CycleReport, MemoryReaderFactory, ProfilingCoordinator, HOOK_NAME};
pub use error::{ConfigurationError, ProfilingError, Result, TeardownFailure};
pub use hooks::{LifecycleHooks, Pipeline};

//! Heap telemetry for long-running task pipelines
//!
//! Captures sampled heap profiles, allocation tracking summaries, heap
//! snapshots and peak resident memory over one pipeline run, without the
//! pipeline's own logic knowing about it.
//!
//! # Example
//!
//! ```
//! use heap_telemetry::{in_process_backend, ProfilingConfig, ProfilingCoordinator, TaskPipeline};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = std::env::temp_dir().join("heap-telemetry-doc");
//! let (transport, heap) = in_process_backend();
//! let config = ProfilingConfig::builder().heap_profile(true).build()?;
//!
//! let mut pipeline = TaskPipeline::new().with_output_dir(&dir);
//! ProfilingCoordinator::new(config, transport).apply(&mut pipeline)?;
//!
//! let report = pipeline
//!     .run(|| async {
//!         heap.record_allocation("bundle", 64 * 1024);
//!     })
//!     .await;
//! assert!(report.is_clean());
//! assert!(dir.join("v8-heap-sample.heapprofile").exists());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod pipeline;

use std::sync::Arc;

pub use artifact_writer::{ArtifactWriter, FsStorage, MemoryStorage, StorageError};
pub use instrumentation::{AllocationSummary, ModeError, ModeKind, ModeState};
pub use memory_sampler::{PeakMemoryReport, PeakMemorySampler, ProcessMemoryReader};
pub use pipeline::{HookFailure, HookPhase, PipelineReport, TaskPipeline};
pub use profiler_domains::HeapProfilerDomain;
pub use profiling_coordinator::{
    ConfigurationError, CycleReport, LifecycleHooks, Pipeline, ProfilingConfig,
    ProfilingCoordinator, ProfilingError, ProfilingOptions, TeardownFailure,
};
pub use protocol_session::{
    LocalTransport, ProtocolError, ProtocolSession, Transport, WebSocketTransport,
};

/// An in-process HeapProfiler backend behind a local transport
///
/// Allocations reported to the returned domain show up in the profiles,
/// summaries and snapshots the coordinator captures.
pub fn in_process_backend() -> (Arc<LocalTransport>, Arc<HeapProfilerDomain>) {
    let transport = LocalTransport::new();
    let domain = Arc::new(HeapProfilerDomain::new(transport.event_bus()));
    transport.register_domain(domain.clone());
    (Arc::new(transport), domain)
}

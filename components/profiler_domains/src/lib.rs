//! In-process heap profiling backend
//!
//! This crate provides [`HeapProfilerDomain`], an implementation of the
//! HeapProfiler protocol domain that can be registered on a
//! `LocalTransport`. It stands in for a runtime inspector when the process
//! being observed reports its allocations directly.
//!
//! # Example
//!
//! ```
//! use profiler_domains::HeapProfilerDomain;
//! use protocol_session::LocalTransport;
//! use std::sync::Arc;
//!
//! let transport = LocalTransport::new();
//! let domain = Arc::new(HeapProfilerDomain::new(transport.event_bus()));
//! transport.register_domain(domain.clone());
//! domain.record_allocation("compile", 4096);
//! ```

mod heap_profiler_domain;

pub use heap_profiler_domain::{HeapProfilerDomain, RecordedAllocation, DEFAULT_CHUNK_SIZE};

//! Heap instrumentation modes
//!
//! Each mode wraps one kind of V8 heap instrumentation behind the
//! [`InstrumentationMode`] trait: it sends its own start and stop commands
//! over a shared [`ProtocolSession`](protocol_session::ProtocolSession) and
//! turns the result into an [`Artifact`].
//!
//! | Mode | Start | Stop | Artifact |
//! |------|-------|------|----------|
//! | [`SamplingProfileMode`] | `startSampling` | `stopSampling` | `profile` JSON |
//! | [`AllocationTrackingMode`] | `startTrackingHeapObjects` | `stopTrackingHeapObjects` | [`AllocationSummary`] JSON |
//! | [`HeapSnapshotMode`] | none | `takeHeapSnapshot` | streamed snapshot chunks |

pub mod allocation;
pub mod artifact;
pub mod error;
pub mod mode;
pub mod sampling;
pub mod snapshot;

pub use allocation::{AllocationSummary, AllocationTrackingMode, FragmentStats};
pub use artifact::{Artifact, ArtifactPayload};
pub use error::{ModeError, Result};
pub use mode::{InstrumentationMode, ModeKind, ModeState};
pub use sampling::SamplingProfileMode;
pub use snapshot::HeapSnapshotMode;

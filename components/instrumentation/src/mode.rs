//! Instrumentation mode contract

use artifact_writer::{ArtifactWriter, WrittenArtifact};
use async_trait::async_trait;
use protocol_session::ProtocolSession;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::error::Result;

/// The kinds of instrumentation, in the order they are started
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModeKind {
    /// Sampled allocation call stacks
    SamplingProfile,
    /// Exhaustive per-allocation tracking
    AllocationTracking,
    /// Full point-in-time heap graph
    HeapSnapshot,
}

impl ModeKind {
    /// Every kind, in start order
    pub const ALL: [ModeKind; 3] = [
        ModeKind::SamplingProfile,
        ModeKind::AllocationTracking,
        ModeKind::HeapSnapshot,
    ];

    /// Default artifact file name
    pub fn default_file_name(&self) -> &'static str {
        match self {
            ModeKind::SamplingProfile => "v8-heap-sample.heapprofile",
            ModeKind::AllocationTracking => "v8-heap-allocations.json",
            ModeKind::HeapSnapshot => "v8-heap.heapsnapshot",
        }
    }

    /// Whether the mode sends a command when it starts
    pub fn has_start_command(&self) -> bool {
        !matches!(self, ModeKind::HeapSnapshot)
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModeKind::SamplingProfile => "sampling profile",
            ModeKind::AllocationTracking => "allocation tracking",
            ModeKind::HeapSnapshot => "heap snapshot",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one mode instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeState {
    /// Created, not started
    Idle,
    /// Start command in flight
    Starting,
    /// Started and collecting
    Active,
    /// Stop command in flight or artifact being produced
    Stopping,
    /// Stopped and artifact produced
    Completed,
    /// A command failed
    Failed,
}

impl fmt::Display for ModeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModeState::Idle => "idle",
            ModeState::Starting => "starting",
            ModeState::Active => "active",
            ModeState::Stopping => "stopping",
            ModeState::Completed => "completed",
            ModeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One instrumentation mode bound to a protocol session
///
/// Modes only send their own commands; enabling and disabling the session
/// is up to its owner.
#[async_trait]
pub trait InstrumentationMode: Send {
    /// Which mode this is
    fn kind(&self) -> ModeKind;

    /// Current lifecycle state
    fn state(&self) -> ModeState;

    /// Force the lifecycle state
    fn set_state(&mut self, state: ModeState);

    /// Send the start command, if the mode has one
    async fn start(&mut self, session: &ProtocolSession) -> Result<()>;

    /// Send the stop command and hand back the artifact, if the mode produces one
    async fn stop<'s>(&mut self, session: &'s ProtocolSession) -> Result<Option<Artifact<'s>>>;

    /// Stop and persist the artifact through `writer`
    ///
    /// A mode whose artifact is produced lazily stays `Stopping` until the
    /// artifact is written, then settles on `Completed` or `Failed`.
    async fn finish(
        &mut self,
        session: &ProtocolSession,
        writer: &ArtifactWriter,
    ) -> Result<Option<WrittenArtifact>> {
        let artifact = match self.stop(session).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.set_state(ModeState::Failed);
                return Err(e);
            }
        };

        let outcome = match artifact {
            Some(artifact) => artifact.write(writer).await.map(Some),
            None => Ok(None),
        };

        if self.state() == ModeState::Stopping {
            self.set_state(if outcome.is_ok() {
                ModeState::Completed
            } else {
                ModeState::Failed
            });
        }

        match &outcome {
            Ok(Some(written)) => debug!("{} artifact at {}", self.kind(), written.path.display()),
            Ok(None) => debug!("{} produced no artifact", self.kind()),
            Err(e) => warn!("{} artifact not written: {}", self.kind(), e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_sort_in_start_order() {
        let mut kinds = vec![
            ModeKind::HeapSnapshot,
            ModeKind::SamplingProfile,
            ModeKind::AllocationTracking,
        ];
        kinds.sort();
        assert_eq!(kinds, ModeKind::ALL.to_vec());
    }

    #[test]
    fn test_default_file_names() {
        assert_eq!(
            ModeKind::SamplingProfile.default_file_name(),
            "v8-heap-sample.heapprofile"
        );
        assert!(!ModeKind::HeapSnapshot.has_start_command());
    }

    #[test]
    fn test_kind_serde() {
        assert_eq!(
            serde_json::to_string(&ModeKind::AllocationTracking).unwrap(),
            "\"allocationTracking\""
        );
    }
}

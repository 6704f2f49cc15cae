//! Sampling heap profile mode

use async_trait::async_trait;
use cdp_types::domains::heap_profiler::{methods, StartSamplingParams};
use protocol_session::{ProtocolError, ProtocolSession};
use std::path::PathBuf;
use tracing::info;

use crate::artifact::Artifact;
use crate::error::{ModeError, Result};
use crate::mode::{InstrumentationMode, ModeKind, ModeState};

/// Records sampled allocation call stacks between start and stop
///
/// The artifact is the `profile` member of the `stopSampling` reply, written
/// verbatim.
#[derive(Debug)]
pub struct SamplingProfileMode {
    path: PathBuf,
    sampling_interval: Option<f64>,
    state: ModeState,
}

impl SamplingProfileMode {
    /// Create a mode writing its profile to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sampling_interval: None,
            state: ModeState::Idle,
        }
    }

    /// Average bytes between samples; the endpoint default applies when unset
    pub fn with_sampling_interval(mut self, bytes: Option<f64>) -> Self {
        self.sampling_interval = bytes;
        self
    }

    /// Destination of the profile
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn expect_state(&self, expected: ModeState, action: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(ModeError::InvalidState {
                mode: ModeKind::SamplingProfile,
                action,
                state: self.state,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl InstrumentationMode for SamplingProfileMode {
    fn kind(&self) -> ModeKind {
        ModeKind::SamplingProfile
    }

    fn state(&self) -> ModeState {
        self.state
    }

    fn set_state(&mut self, state: ModeState) {
        self.state = state;
    }

    async fn start(&mut self, session: &ProtocolSession) -> Result<()> {
        self.expect_state(ModeState::Idle, "start")?;
        self.state = ModeState::Starting;

        let params = StartSamplingParams {
            sampling_interval: self.sampling_interval,
        };
        match session.send_with(methods::START_SAMPLING, &params).await {
            Ok(_) => {
                self.state = ModeState::Active;
                info!("Heap sampling started");
                Ok(())
            }
            Err(e) => {
                self.state = ModeState::Failed;
                Err(e.into())
            }
        }
    }

    async fn stop<'s>(&mut self, session: &'s ProtocolSession) -> Result<Option<Artifact<'s>>> {
        self.expect_state(ModeState::Active, "stop")?;
        self.state = ModeState::Stopping;

        let mut reply = match session.send(methods::STOP_SAMPLING, None).await {
            Ok(reply) => reply,
            Err(e) => {
                self.state = ModeState::Failed;
                return Err(e.into());
            }
        };

        let Some(profile) = reply.get_mut("profile").map(serde_json::Value::take) else {
            self.state = ModeState::Failed;
            return Err(ProtocolError::UnexpectedReply {
                method: methods::STOP_SAMPLING.to_string(),
                details: "missing `profile`".to_string(),
            }
            .into());
        };

        self.state = ModeState::Completed;
        info!("Heap sampling stopped");
        Ok(Some(Artifact::json(
            ModeKind::SamplingProfile,
            self.path.clone(),
            profile,
        )))
    }
}

//! Heap snapshot mode

use async_trait::async_trait;
use cdp_types::domains::heap_profiler::{
    events, methods, AddHeapSnapshotChunk, TakeHeapSnapshotParams,
};
use cdp_types::CdpEvent;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use protocol_session::{EventStream, ProtocolError, ProtocolSession};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::error::{ModeError, Result};
use crate::mode::{InstrumentationMode, ModeKind, ModeState};

/// Captures one full heap snapshot when stopped
///
/// There is no start command: `start` only arms the mode. `stop` hands back
/// a lazy chunk stream; `takeHeapSnapshot` is sent when the stream is first
/// polled and chunks are yielded as the endpoint pushes them.
#[derive(Debug)]
pub struct HeapSnapshotMode {
    path: PathBuf,
    capture_numeric_value: bool,
    state: ModeState,
}

impl HeapSnapshotMode {
    /// Create a mode writing its snapshot to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capture_numeric_value: false,
            state: ModeState::Idle,
        }
    }

    /// Include numeric values in the snapshot
    pub fn with_numeric_values(mut self, capture: bool) -> Self {
        self.capture_numeric_value = capture;
        self
    }

    /// Destination of the snapshot
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl InstrumentationMode for HeapSnapshotMode {
    fn kind(&self) -> ModeKind {
        ModeKind::HeapSnapshot
    }

    fn state(&self) -> ModeState {
        self.state
    }

    fn set_state(&mut self, state: ModeState) {
        self.state = state;
    }

    async fn start(&mut self, _session: &ProtocolSession) -> Result<()> {
        if self.state != ModeState::Idle {
            return Err(ModeError::InvalidState {
                mode: ModeKind::HeapSnapshot,
                action: "start",
                state: self.state,
            });
        }
        self.state = ModeState::Active;
        debug!("Heap snapshot armed");
        Ok(())
    }

    async fn stop<'s>(&mut self, session: &'s ProtocolSession) -> Result<Option<Artifact<'s>>> {
        if self.state != ModeState::Active {
            return Err(ModeError::InvalidState {
                mode: ModeKind::HeapSnapshot,
                action: "stop",
                state: self.state,
            });
        }
        // Stays Stopping until the stream has been written
        self.state = ModeState::Stopping;
        info!("Taking heap snapshot");

        let params = TakeHeapSnapshotParams {
            report_progress: false,
            capture_numeric_value: self.capture_numeric_value,
        };
        let params = serde_json::to_value(params).map_err(ProtocolError::from)?;
        Ok(Some(Artifact::chunks(
            ModeKind::HeapSnapshot,
            self.path.clone(),
            snapshot_chunks(session, params),
        )))
    }
}

/// In-flight `takeHeapSnapshot` and the chunks it produces
struct Capture<'s> {
    session: &'s ProtocolSession,
    params: Option<Value>,
    call: Option<BoxFuture<'s, protocol_session::Result<Value>>>,
    chunks: EventStream,
    done: bool,
}

/// Stream the snapshot chunks of one `takeHeapSnapshot` call
///
/// Chunks are yielded while the call is pending; once it replies, chunks
/// still queued are drained and the stream ends. A failed call ends the
/// stream with that error.
fn snapshot_chunks(session: &ProtocolSession, params: Value) -> BoxStream<'_, Result<String>> {
    let capture = Capture {
        session,
        params: Some(params),
        call: None,
        chunks: session.subscribe(events::ADD_HEAP_SNAPSHOT_CHUNK),
        done: false,
    };

    stream::unfold(capture, |mut capture| async move {
        if let Some(params) = capture.params.take() {
            let session = capture.session;
            capture.call = Some(Box::pin(
                session.send(methods::TAKE_HEAP_SNAPSHOT, Some(params)),
            ));
        }

        loop {
            if capture.call.is_none() {
                if capture.done {
                    return None;
                }
                let event = capture.chunks.try_recv().ok()?;
                return Some((chunk_text(event), capture));
            }
            let call = capture.call.as_mut()?;

            tokio::select! {
                biased;
                Some(event) = capture.chunks.recv() => {
                    return Some((chunk_text(event), capture));
                }
                reply = call => {
                    capture.call = None;
                    if let Err(e) = reply {
                        capture.done = true;
                        return Some((Err(e.into()), capture));
                    }
                    debug!("Heap snapshot capture finished");
                }
            }
        }
    })
    .boxed()
}

fn chunk_text(event: CdpEvent) -> Result<String> {
    serde_json::from_value::<AddHeapSnapshotChunk>(event.params)
        .map(|payload| payload.chunk)
        .map_err(|e| {
            ModeError::Protocol(ProtocolError::InvalidMessage(format!(
                "{}: {}",
                events::ADD_HEAP_SNAPSHOT_CHUNK,
                e
            )))
        })
}

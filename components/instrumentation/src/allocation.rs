//! Allocation tracking mode

use async_trait::async_trait;
use cdp_types::domains::heap_profiler::{
    events, methods, HeapStatsUpdate, LastSeenObjectId, StartTrackingHeapObjectsParams,
};
use cdp_types::CdpEvent;
use parking_lot::Mutex;
use protocol_session::{EventStream, ProtocolError, ProtocolSession};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::error::{ModeError, Result};
use crate::mode::{InstrumentationMode, ModeKind, ModeState};

/// Latest object count and size of one heap fragment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentStats {
    /// Live objects in the fragment
    pub count: u64,
    /// Bytes held by the fragment
    pub size: u64,
}

/// What allocation tracking observed over one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSummary {
    /// Number of `heapStatsUpdate` events seen
    pub stats_updates: u64,
    /// Highest object id reported
    pub last_seen_object_id: Option<u64>,
    /// Timestamp of that report
    pub last_timestamp: Option<f64>,
    /// Latest stats per fragment index
    pub fragments: BTreeMap<u64, FragmentStats>,
    /// Sum of fragment counts
    pub total_count: u64,
    /// Sum of fragment sizes
    pub total_size: u64,
}

impl AllocationSummary {
    /// Fold a `heapStatsUpdate` payload
    pub fn record_stats(&mut self, update: &HeapStatsUpdate) {
        self.stats_updates += 1;
        for (index, count, size) in update.fragments() {
            self.fragments.insert(index, FragmentStats { count, size });
        }
        self.total_count = self.fragments.values().map(|f| f.count).sum();
        self.total_size = self.fragments.values().map(|f| f.size).sum();
    }

    /// Fold a `lastSeenObjectId` payload
    pub fn record_last_seen(&mut self, seen: &LastSeenObjectId) {
        self.last_seen_object_id = Some(
            self.last_seen_object_id
                .map_or(seen.last_seen_object_id, |id| id.max(seen.last_seen_object_id)),
        );
        self.last_timestamp = Some(seen.timestamp);
    }
}

/// Tracks every allocation between start and stop
///
/// Heap statistics pushed by the endpoint while tracking are folded into an
/// [`AllocationSummary`] as they arrive, by a task that lives from start to
/// stop. The summary becomes the artifact.
#[derive(Debug)]
pub struct AllocationTrackingMode {
    path: PathBuf,
    state: ModeState,
    summary: Arc<Mutex<AllocationSummary>>,
    folder: Option<EventFolder>,
}

/// Background fold of tracking events into the shared summary
#[derive(Debug)]
struct EventFolder {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl EventFolder {
    fn spawn(
        stats: EventStream,
        last_seen: EventStream,
        summary: Arc<Mutex<AllocationSummary>>,
    ) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(fold_events(stats, last_seen, summary, shutdown_rx));
        Self { shutdown, task }
    }

    /// Fold whatever is still queued, then wait for the task to exit
    async fn finish(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Allocation event fold ended abnormally: {}", e);
        }
    }
}

async fn fold_events(
    mut stats: EventStream,
    mut last_seen: EventStream,
    summary: Arc<Mutex<AllocationSummary>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            Some(event) = stats.recv() => fold_stats(&summary, &event),
            Some(event) = last_seen.recv() => fold_last_seen(&summary, &event),
            _ = &mut shutdown => break,
        }
    }

    // Final stats are pushed before the stop reply
    while let Ok(event) = stats.try_recv() {
        fold_stats(&summary, &event);
    }
    while let Ok(event) = last_seen.try_recv() {
        fold_last_seen(&summary, &event);
    }
}

fn fold_stats(summary: &Mutex<AllocationSummary>, event: &CdpEvent) {
    if let Some(update) = decode::<HeapStatsUpdate>(event) {
        summary.lock().record_stats(&update);
    }
}

fn fold_last_seen(summary: &Mutex<AllocationSummary>, event: &CdpEvent) {
    if let Some(seen) = decode::<LastSeenObjectId>(event) {
        summary.lock().record_last_seen(&seen);
    }
}

impl AllocationTrackingMode {
    /// Create a mode writing its summary to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: ModeState::Idle,
            summary: Arc::new(Mutex::new(AllocationSummary::default())),
            folder: None,
        }
    }

    /// Destination of the summary
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Everything folded so far
    pub fn summary(&self) -> AllocationSummary {
        self.summary.lock().clone()
    }

    fn expect_state(&self, expected: ModeState, action: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(ModeError::InvalidState {
                mode: ModeKind::AllocationTracking,
                action,
                state: self.state,
            });
        }
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &CdpEvent) -> Option<T> {
    match serde_json::from_value(event.params.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed {} event: {}", event.method, e);
            None
        }
    }
}

#[async_trait]
impl InstrumentationMode for AllocationTrackingMode {
    fn kind(&self) -> ModeKind {
        ModeKind::AllocationTracking
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

        // Subscribe first: the endpoint pushes initial stats before replying
        let stats = session.subscribe(events::HEAP_STATS_UPDATE);
        let last_seen = session.subscribe(events::LAST_SEEN_OBJECT_ID);

        let params = StartTrackingHeapObjectsParams {
            track_allocations: true,
        };
        match session
            .send_with(methods::START_TRACKING_HEAP_OBJECTS, &params)
            .await
        {
            Ok(_) => {
                *self.summary.lock() = AllocationSummary::default();
                self.folder = Some(EventFolder::spawn(
                    stats,
                    last_seen,
                    Arc::clone(&self.summary),
                ));
                self.state = ModeState::Active;
                info!("Allocation tracking started");
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

        let result = session
            .send(
                methods::STOP_TRACKING_HEAP_OBJECTS,
                Some(json!({ "reportProgress": false })),
            )
            .await;

        if let Some(folder) = self.folder.take() {
            folder.finish().await;
        }

        if let Err(e) = result {
            self.state = ModeState::Failed;
            return Err(e.into());
        }

        let summary = serde_json::to_value(self.summary()).map_err(ProtocolError::from)?;
        self.state = ModeState::Completed;
        info!("Allocation tracking stopped");
        Ok(Some(Artifact::json(
            ModeKind::AllocationTracking,
            self.path.clone(),
            summary,
        )))
    }
}

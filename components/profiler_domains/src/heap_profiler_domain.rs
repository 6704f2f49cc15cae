//! HeapProfilerDomain implementation
//!
//! An in-process HeapProfiler backend. Allocations are reported to it
//! explicitly through [`HeapProfilerDomain::record_allocation`]; it answers
//! the sampling, tracking and snapshot commands from that record and emits
//! the same events a runtime inspector would.

use async_trait::async_trait;
use cdp_types::domains::heap_profiler::{
    events, AddHeapSnapshotChunk, CallFrame, HeapStatsUpdate, LastSeenObjectId,
    SamplingHeapProfile, SamplingHeapProfileNode, SamplingHeapProfileSample,
    StartSamplingParams, StartTrackingHeapObjectsParams, TakeHeapSnapshotParams, DOMAIN,
};
use cdp_types::{CdpError, CdpEvent};
use parking_lot::RwLock;
use protocol_session::{DomainHandler, EventBus};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Default size of each `addHeapSnapshotChunk` fragment, in characters
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// An allocation known to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAllocation {
    /// Heap object id
    pub object_id: u64,
    /// Function the allocation is attributed to
    pub function_name: String,
    /// Size in bytes
    pub size: u64,
}

/// HeapProfilerDomain handles heap profiling commands for one process
#[derive(Debug)]
pub struct HeapProfilerDomain {
    /// Whether the domain is enabled
    enabled: Arc<AtomicBool>,
    /// Whether heap sampling is currently active
    sampling_active: Arc<AtomicBool>,
    /// Current sampling interval in bytes
    sampling_interval: Arc<RwLock<f64>>,
    /// Whether heap object tracking is active
    tracking_active: Arc<AtomicBool>,
    /// Live allocations
    allocations: Arc<RwLock<Vec<RecordedAllocation>>>,
    /// Allocations seen while sampling was active
    sampled: Arc<RwLock<Vec<RecordedAllocation>>>,
    /// Next heap object id
    next_object_id: Arc<AtomicU64>,
    /// Methods forced to fail
    failing_methods: Arc<RwLock<HashSet<String>>>,
    /// Where events are published
    events: EventBus,
    /// Snapshot fragment size
    chunk_size: usize,
    /// Time origin for event timestamps
    started_at: Instant,
}

impl HeapProfilerDomain {
    /// Create a new HeapProfilerDomain publishing to `events`
    pub fn new(events: EventBus) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(false)),
            sampling_active: Arc::new(AtomicBool::new(false)),
            sampling_interval: Arc::new(RwLock::new(32768.0)), // Default 32KB
            tracking_active: Arc::new(AtomicBool::new(false)),
            allocations: Arc::new(RwLock::new(Vec::new())),
            sampled: Arc::new(RwLock::new(Vec::new())),
            next_object_id: Arc::new(AtomicU64::new(1)),
            failing_methods: Arc::new(RwLock::new(HashSet::new())),
            events,
            chunk_size: DEFAULT_CHUNK_SIZE,
            started_at: Instant::now(),
        }
    }

    /// Use `chunk_size` characters per snapshot fragment
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Check if the domain is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Check if heap sampling is currently active
    pub fn is_sampling(&self) -> bool {
        self.sampling_active.load(Ordering::SeqCst)
    }

    /// Check if heap object tracking is currently active
    pub fn is_tracking(&self) -> bool {
        self.tracking_active.load(Ordering::SeqCst)
    }

    /// Current sampling interval in bytes
    pub fn sampling_interval(&self) -> f64 {
        *self.sampling_interval.read()
    }

    /// Make `method` (without domain prefix) answer with a server error
    pub fn fail_method(&self, method: &str) {
        self.failing_methods.write().insert(method.to_string());
    }

    /// Record an allocation attributed to `function_name`, returning its object id
    pub fn record_allocation(&self, function_name: &str, size: u64) -> u64 {
        let object_id = self.next_object_id.fetch_add(1, Ordering::SeqCst);
        let allocation = RecordedAllocation {
            object_id,
            function_name: function_name.to_string(),
            size,
        };

        if self.is_sampling() {
            self.sampled.write().push(allocation.clone());
        }
        self.allocations.write().push(allocation);

        if self.is_tracking() {
            self.publish_tracking_update();
        }

        object_id
    }

    /// Number of live allocations
    pub fn allocation_count(&self) -> usize {
        self.allocations.read().len()
    }

    fn elapsed_ms(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * 1000.0
    }

    fn parse_params<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T, CdpError> {
        match params {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| CdpError::invalid_params(e.to_string())),
        }
    }

    fn require_enabled(&self) -> Result<(), CdpError> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(CdpError::server_error(-32000, "Heap profiler is not enabled"))
        }
    }

    fn publish(&self, method: &str, params: Value) {
        self.events.publish(CdpEvent::new(method, params));
    }

    fn publish_tracking_update(&self) {
        let (count, size) = {
            let allocations = self.allocations.read();
            (
                allocations.len() as u64,
                allocations.iter().map(|a| a.size).sum::<u64>(),
            )
        };

        let update = HeapStatsUpdate {
            stats_update: vec![0, count, size],
        };
        self.publish(events::HEAP_STATS_UPDATE, json!(update));

        let last_seen = LastSeenObjectId {
            last_seen_object_id: self.next_object_id.load(Ordering::SeqCst).saturating_sub(1),
            timestamp: self.elapsed_ms(),
        };
        self.publish(events::LAST_SEEN_OBJECT_ID, json!(last_seen));
    }

    /// Handle the enable method
    fn handle_enable(&self) -> Result<Value, CdpError> {
        debug!("HeapProfiler.enable called");
        self.enabled.store(true, Ordering::SeqCst);
        Ok(json!({}))
    }

    /// Handle the disable method
    fn handle_disable(&self) -> Result<Value, CdpError> {
        debug!("HeapProfiler.disable called");
        self.enabled.store(false, Ordering::SeqCst);
        self.sampling_active.store(false, Ordering::SeqCst);
        self.tracking_active.store(false, Ordering::SeqCst);
        Ok(json!({}))
    }

    /// Handle the startSampling method
    fn handle_start_sampling(&self, params: Option<Value>) -> Result<Value, CdpError> {
        debug!("HeapProfiler.startSampling called");
        self.require_enabled()?;

        if self.is_sampling() {
            return Err(CdpError::server_error(-32000, "Sampling profiler is already running"));
        }

        let params: StartSamplingParams = Self::parse_params(params)?;
        if let Some(interval) = params.sampling_interval {
            if interval <= 0.0 {
                return Err(CdpError::invalid_params("samplingInterval must be positive"));
            }
            *self.sampling_interval.write() = interval;
        }

        self.sampled.write().clear();
        self.sampling_active.store(true, Ordering::SeqCst);
        Ok(json!({}))
    }

    /// Handle the stopSampling method
    fn handle_stop_sampling(&self) -> Result<Value, CdpError> {
        debug!("HeapProfiler.stopSampling called");

        if !self.is_sampling() {
            return Err(CdpError::server_error(-32000, "Sampling profiler is not running"));
        }

        self.sampling_active.store(false, Ordering::SeqCst);
        let profile = self.build_sampling_profile();
        Ok(json!({ "profile": profile }))
    }

    /// Handle the collectGarbage method
    fn handle_collect_garbage(&self) -> Result<Value, CdpError> {
        debug!("HeapProfiler.collectGarbage called");
        self.require_enabled()?;
        Ok(json!({}))
    }

    /// Handle the startTrackingHeapObjects method
    fn handle_start_tracking_heap_objects(&self, params: Option<Value>) -> Result<Value, CdpError> {
        debug!("HeapProfiler.startTrackingHeapObjects called");
        self.require_enabled()?;

        if self.is_tracking() {
            return Err(CdpError::server_error(-32000, "Heap object tracking is already running"));
        }

        let params: StartTrackingHeapObjectsParams = Self::parse_params(params)?;
        debug!("Tracking allocations with stacks: {}", params.track_allocations);

        self.tracking_active.store(true, Ordering::SeqCst);
        self.publish_tracking_update();
        Ok(json!({}))
    }

    /// Handle the stopTrackingHeapObjects method
    fn handle_stop_tracking_heap_objects(&self) -> Result<Value, CdpError> {
        debug!("HeapProfiler.stopTrackingHeapObjects called");

        if !self.is_tracking() {
            return Err(CdpError::server_error(-32000, "Heap object tracking is not running"));
        }

        self.publish_tracking_update();
        self.tracking_active.store(false, Ordering::SeqCst);
        Ok(json!({}))
    }

    /// Handle the takeHeapSnapshot method
    ///
    /// The snapshot is published as `addHeapSnapshotChunk` events before the
    /// reply is returned.
    fn handle_take_heap_snapshot(&self, params: Option<Value>) -> Result<Value, CdpError> {
        debug!("HeapProfiler.takeHeapSnapshot called");
        self.require_enabled()?;

        let params: TakeHeapSnapshotParams = Self::parse_params(params)?;
        let serialized = self.serialize_snapshot();
        let chunks = split_chunks(&serialized, self.chunk_size);
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            if params.report_progress {
                self.publish(
                    events::REPORT_HEAP_SNAPSHOT_PROGRESS,
                    json!({ "done": index, "total": total, "finished": false }),
                );
            }
            self.publish(
                events::ADD_HEAP_SNAPSHOT_CHUNK,
                json!(AddHeapSnapshotChunk { chunk }),
            );
        }

        if params.report_progress {
            self.publish(
                events::REPORT_HEAP_SNAPSHOT_PROGRESS,
                json!({ "done": total, "total": total, "finished": true }),
            );
        }

        Ok(json!({}))
    }

    /// Build the sampling profile from allocations seen while sampling
    fn build_sampling_profile(&self) -> SamplingHeapProfile {
        let sampled = self.sampled.read();
        let mut children: Vec<SamplingHeapProfileNode> = Vec::new();
        let mut samples = Vec::with_capacity(sampled.len());

        for (ordinal, allocation) in sampled.iter().enumerate() {
            let position = match children
                .iter()
                .position(|node| node.call_frame.function_name == allocation.function_name)
            {
                Some(position) => position,
                None => {
                    children.push(SamplingHeapProfileNode {
                        call_frame: call_frame(&allocation.function_name, 1),
                        self_size: 0.0,
                        id: children.len() as u32 + 2,
                        children: vec![],
                    });
                    children.len() - 1
                }
            };

            let node = &mut children[position];
            node.self_size += allocation.size as f64;
            samples.push(SamplingHeapProfileSample {
                size: allocation.size as f64,
                node_id: node.id,
                ordinal: (ordinal + 1) as f64,
            });
        }

        SamplingHeapProfile {
            head: SamplingHeapProfileNode {
                call_frame: call_frame("(root)", 0),
                self_size: 0.0,
                id: 1,
                children,
            },
            samples,
        }
    }

    /// Serialize live allocations in the heapsnapshot layout
    fn serialize_snapshot(&self) -> String {
        let allocations = self.allocations.read();
        let mut strings = vec!["(root)".to_string()];
        let mut nodes: Vec<u64> = vec![0, 0, 1, 0, 0, 0];

        for allocation in allocations.iter() {
            let name_index = match strings.iter().position(|s| *s == allocation.function_name) {
                Some(index) => index,
                None => {
                    strings.push(allocation.function_name.clone());
                    strings.len() - 1
                }
            };
            nodes.extend_from_slice(&[
                3,
                name_index as u64,
                allocation.object_id,
                allocation.size,
                0,
                0,
            ]);
        }

        json!({
            "snapshot": {
                "meta": {
                    "node_fields": ["type", "name", "id", "self_size", "edge_count", "trace_node_id"],
                    "node_types": [
                        ["hidden", "array", "string", "object"],
                        "string", "number", "number", "number", "number"
                    ],
                    "edge_fields": ["type", "name_or_index", "to_node"],
                    "edge_types": [["element", "property"], "string_or_number", "node"]
                },
                "node_count": allocations.len() + 1,
                "edge_count": 0
            },
            "nodes": nodes,
            "edges": [],
            "strings": strings
        })
        .to_string()
    }
}

fn call_frame(function_name: &str, script_id: u32) -> CallFrame {
    CallFrame {
        function_name: function_name.to_string(),
        script_id: script_id.to_string(),
        url: String::new(),
        line_number: -1,
        column_number: -1,
    }
}

/// Split `text` into fragments of at most `size` characters
fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[async_trait]
impl DomainHandler for HeapProfilerDomain {
    fn name(&self) -> &str {
        DOMAIN
    }

    async fn handle_method(&self, method: &str, params: Option<Value>) -> Result<Value, CdpError> {
        debug!("HeapProfiler domain handling method: {}", method);

        if self.failing_methods.read().contains(method) {
            warn!("HeapProfiler.{} forced to fail", method);
            return Err(CdpError::server_error(
                -32000,
                format!("HeapProfiler.{} failed", method),
            ));
        }

        match method {
            "enable" => self.handle_enable(),
            "disable" => self.handle_disable(),
            "startSampling" => self.handle_start_sampling(params),
            "stopSampling" => self.handle_stop_sampling(),
            "collectGarbage" => self.handle_collect_garbage(),
            "takeHeapSnapshot" => self.handle_take_heap_snapshot(params),
            "startTrackingHeapObjects" => self.handle_start_tracking_heap_objects(params),
            "stopTrackingHeapObjects" => self.handle_stop_tracking_heap_objects(),
            _ => {
                warn!("Unknown HeapProfiler method: {}", method);
                Err(CdpError::method_not_found(format!("HeapProfiler.{}", method)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_profiler_domain_new() {
        let heap_profiler = HeapProfilerDomain::new(EventBus::new());
        assert_eq!(heap_profiler.name(), "HeapProfiler");
        assert!(!heap_profiler.is_sampling());
        assert!(!heap_profiler.is_tracking());
    }

    #[test]
    fn test_sampling_interval_default() {
        let heap_profiler = HeapProfilerDomain::new(EventBus::new());
        assert_eq!(heap_profiler.sampling_interval(), 32768.0);
    }

    #[test]
    fn test_split_chunks() {
        assert_eq!(split_chunks("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(split_chunks("", 3), Vec::<String>::new());
        assert_eq!(split_chunks("héllo", 2), vec!["hé", "ll", "o"]);
    }

    #[tokio::test]
    async fn test_enable_disable() {
        let heap_profiler = HeapProfilerDomain::new(EventBus::new());

        heap_profiler.handle_method("enable", None).await.unwrap();
        assert!(heap_profiler.is_enabled());

        heap_profiler.handle_method("disable", None).await.unwrap();
        assert!(!heap_profiler.is_enabled());
    }

    #[tokio::test]
    async fn test_profile_groups_by_function() {
        let heap_profiler = HeapProfilerDomain::new(EventBus::new());
        heap_profiler.handle_method("enable", None).await.unwrap();
        heap_profiler.record_allocation("beforeSampling", 8);
        heap_profiler.handle_method("startSampling", None).await.unwrap();

        heap_profiler.record_allocation("parseModule", 100);
        heap_profiler.record_allocation("emitChunk", 50);
        heap_profiler.record_allocation("parseModule", 20);

        let profile = heap_profiler.build_sampling_profile();
        assert_eq!(profile.head.children.len(), 2);
        assert_eq!(profile.head.children[0].call_frame.function_name, "parseModule");
        assert_eq!(profile.head.children[0].self_size, 120.0);
        assert_eq!(profile.samples.len(), 3);
        assert_eq!(profile.samples[2].node_id, profile.head.children[0].id);
    }
}

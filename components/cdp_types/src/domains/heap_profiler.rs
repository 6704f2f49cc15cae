// HeapProfiler domain types

use serde::{Deserialize, Serialize};

/// Domain name as it appears before the dot in method names
pub const DOMAIN: &str = "HeapProfiler";

/// Fully qualified command names
pub mod methods {
    pub const ENABLE: &str = "HeapProfiler.enable";
    pub const DISABLE: &str = "HeapProfiler.disable";
    pub const START_SAMPLING: &str = "HeapProfiler.startSampling";
    pub const STOP_SAMPLING: &str = "HeapProfiler.stopSampling";
    pub const START_TRACKING_HEAP_OBJECTS: &str = "HeapProfiler.startTrackingHeapObjects";
    pub const STOP_TRACKING_HEAP_OBJECTS: &str = "HeapProfiler.stopTrackingHeapObjects";
    pub const TAKE_HEAP_SNAPSHOT: &str = "HeapProfiler.takeHeapSnapshot";
    pub const COLLECT_GARBAGE: &str = "HeapProfiler.collectGarbage";
}

/// Fully qualified event names
pub mod events {
    pub const ADD_HEAP_SNAPSHOT_CHUNK: &str = "HeapProfiler.addHeapSnapshotChunk";
    pub const HEAP_STATS_UPDATE: &str = "HeapProfiler.heapStatsUpdate";
    pub const LAST_SEEN_OBJECT_ID: &str = "HeapProfiler.lastSeenObjectId";
    pub const REPORT_HEAP_SNAPSHOT_PROGRESS: &str = "HeapProfiler.reportHeapSnapshotProgress";
}

/// Call frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Function name
    pub function_name: String,
    /// Script ID
    pub script_id: String,
    /// Script URL
    pub url: String,
    /// Line number (0-based)
    pub line_number: i64,
    /// Column number (0-based)
    pub column_number: i64,
}

/// Node of the sampling profile allocation tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingHeapProfileNode {
    /// Function location
    pub call_frame: CallFrame,
    /// Allocations size in bytes for the node excluding children
    pub self_size: f64,
    /// Node id, unique across the profile
    pub id: u32,
    /// Child nodes
    pub children: Vec<SamplingHeapProfileNode>,
}

/// A single allocation sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingHeapProfileSample {
    /// Allocation size in bytes attributed to the sample
    pub size: f64,
    /// Id of the corresponding profile tree node
    pub node_id: u32,
    /// Monotonically increasing ordinal of the sample
    pub ordinal: f64,
}

/// Sampling heap profile, as returned by `stopSampling`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingHeapProfile {
    /// Root of the allocation tree
    pub head: SamplingHeapProfileNode,
    /// Individual samples
    pub samples: Vec<SamplingHeapProfileSample>,
}

/// Parameters of `startSampling`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartSamplingParams {
    /// Average sample interval in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_interval: Option<f64>,
}

/// Parameters of `startTrackingHeapObjects`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartTrackingHeapObjectsParams {
    /// Record the allocation stack of every tracked object
    pub track_allocations: bool,
}

/// Parameters of `takeHeapSnapshot` and `stopTrackingHeapObjects`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TakeHeapSnapshotParams {
    /// Emit `reportHeapSnapshotProgress` events while the snapshot is taken
    pub report_progress: bool,
    /// Expose numeric values in the snapshot
    #[serde(default)]
    pub capture_numeric_value: bool,
}

/// `addHeapSnapshotChunk` event payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddHeapSnapshotChunk {
    /// A fragment of the serialized snapshot
    pub chunk: String,
}

/// `heapStatsUpdate` event payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeapStatsUpdate {
    /// Flat triplets of fragment index, object count and byte size
    pub stats_update: Vec<u64>,
}

impl HeapStatsUpdate {
    /// Iterate over `(fragment_index, count, size)` triplets
    pub fn fragments(&self) -> impl Iterator<Item = (u64, u64, u64)> + '_ {
        self.stats_update
            .chunks_exact(3)
            .map(|triplet| (triplet[0], triplet[1], triplet[2]))
    }
}

/// `lastSeenObjectId` event payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastSeenObjectId {
    /// Highest object id assigned so far
    pub last_seen_object_id: u64,
    /// Time of the report in milliseconds
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_camel_case() {
        let profile = SamplingHeapProfile {
            head: SamplingHeapProfileNode {
                call_frame: CallFrame {
                    function_name: "(root)".to_string(),
                    script_id: "0".to_string(),
                    url: String::new(),
                    line_number: -1,
                    column_number: -1,
                },
                self_size: 0.0,
                id: 1,
                children: vec![],
            },
            samples: vec![SamplingHeapProfileSample {
                size: 64.0,
                node_id: 1,
                ordinal: 1.0,
            }],
        };

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["head"]["callFrame"]["functionName"], "(root)");
        assert_eq!(json["samples"][0]["nodeId"], 1);
    }

    #[test]
    fn test_heap_stats_fragments() {
        let update: HeapStatsUpdate =
            serde_json::from_value(json!({"statsUpdate": [0, 10, 640, 1, 2, 128, 9]})).unwrap();
        let fragments: Vec<_> = update.fragments().collect();
        assert_eq!(fragments, vec![(0, 10, 640), (1, 2, 128)]);
    }

    #[test]
    fn test_tracking_params() {
        let params = StartTrackingHeapObjectsParams {
            track_allocations: true,
        };
        assert_eq!(
            serde_json::to_value(params).unwrap(),
            json!({"trackAllocations": true})
        );
    }
}

//! End-to-end tests: a task pipeline profiled through the in-process backend
//! and the real filesystem

use heap_telemetry::{
    in_process_backend, HookPhase, ModeKind, ProfilingCoordinator, ProfilingError,
    ProfilingOptions, TaskPipeline,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

/// Collects formatted log output
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn reported_megabytes(logs: &str) -> Option<f64> {
    let start = logs.find("Peak memory usage: ")? + "Peak memory usage: ".len();
    let rest = &logs[start..];
    rest[..rest.find(" MB")?].parse().ok()
}

#[tokio::test]
async fn test_profile_and_peak_memory_end_to_end() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("out").join("sub").join("profile.heapprofile");
    let options = ProfilingOptions {
        heap_profile: true,
        check_peak_memory: true,
        check_peak_memory_interval_ms: Some(100),
        output_path: Some(output_path.clone()),
        ..Default::default()
    };

    let (transport, heap) = in_process_backend();
    let coordinator = ProfilingCoordinator::from_options(&options, transport).unwrap();

    coordinator.before_run().await.unwrap();
    heap.record_allocation("emitAssets", 256 * 1024);
    tokio::time::sleep(Duration::from_millis(250)).await;
    let report = coordinator.after_completion().await.unwrap();

    assert!(dir.path().join("out").join("sub").is_dir());
    let profile: Value =
        serde_json::from_str(&std::fs::read_to_string(&output_path).unwrap()).unwrap();
    assert_eq!(profile["head"]["id"], 1);
    assert_eq!(profile["samples"].as_array().unwrap().len(), 1);

    let peak = report.peak_memory.unwrap();
    assert!(peak.samples >= 1);
    let megabytes = reported_megabytes(&logs.contents()).unwrap();
    assert!(megabytes >= 0.0);
    assert_eq!(format!("{:.2}", megabytes), format!("{:.2}", peak.megabytes()));
}

#[tokio::test]
async fn test_pipeline_run_with_every_mode() {
    let dir = tempfile::tempdir().unwrap();
    let options = ProfilingOptions::from_json_str(
        r#"{"heapProfile": true, "allocationTracking": true, "heapSnapshot": true}"#,
    )
    .unwrap();

    let (transport, heap) = in_process_backend();
    let mut pipeline = TaskPipeline::new().with_output_dir(dir.path());
    let coordinator = ProfilingCoordinator::from_options(&options, transport)
        .unwrap()
        .apply(&mut pipeline)
        .unwrap();

    let report = pipeline
        .run(|| async {
            for index in 0..10u64 {
                heap.record_allocation("chunk", 1024 * (index + 1));
            }
            "compiled"
        })
        .await;

    assert_eq!(report.output, "compiled");
    assert!(report.is_clean());

    for kind in [
        ModeKind::SamplingProfile,
        ModeKind::AllocationTracking,
        ModeKind::HeapSnapshot,
    ] {
        let path = coordinator.config().output_path(kind);
        assert_eq!(path, dir.path().join(kind.default_file_name()));
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(parsed.is_object(), "{} artifact is not a JSON object", kind);
    }

    let allocations: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("v8-heap-allocations.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(allocations["totalCount"], 10);

    // Staging files never outlive a successful write
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_output_dir_cleaned_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let dist = dir.path().join("dist");
    let options = ProfilingOptions {
        heap_profile: true,
        ..Default::default()
    };

    let (transport, _heap) = in_process_backend();
    let mut pipeline = TaskPipeline::new().with_output_dir(&dist);
    ProfilingCoordinator::from_options(&options, transport)
        .unwrap()
        .apply(&mut pipeline)
        .unwrap();

    let first = pipeline.run(|| async { 1 }).await;
    assert!(first.is_clean());
    assert!(dist.join("v8-heap-sample.heapprofile").is_file());

    // The host wipes its output directory before building again
    std::fs::remove_dir_all(&dist).unwrap();

    let second = pipeline.run(|| async { 2 }).await;
    assert!(second.is_clean(), "{:?}", second.hook_failures);
    assert!(dist.join("v8-heap-sample.heapprofile").is_file());
}

#[tokio::test]
async fn test_failed_start_does_not_block_job() {
    let dir = tempfile::tempdir().unwrap();
    let options = ProfilingOptions {
        heap_profile: true,
        ..Default::default()
    };

    let (transport, heap) = in_process_backend();
    heap.fail_method("startSampling");
    let mut pipeline = TaskPipeline::new().with_output_dir(dir.path());
    ProfilingCoordinator::from_options(&options, transport)
        .unwrap()
        .apply(&mut pipeline)
        .unwrap();

    let report = pipeline.run(|| async { 7 }).await;

    assert_eq!(report.output, 7);
    assert_eq!(report.hook_failures.len(), 1);
    assert_eq!(report.hook_failures[0].phase, HookPhase::BeforeRun);
    assert!(matches!(
        report.hook_failures[0].error,
        ProfilingError::Start {
            mode: ModeKind::SamplingProfile,
            ..
        }
    ));
    assert!(!heap.is_enabled());
    assert!(!dir.path().join("v8-heap-sample.heapprofile").exists());
}

#[tokio::test]
async fn test_unwritable_destination_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the output directory should be
    let blocker = dir.path().join("blocked");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let options = ProfilingOptions {
        heap_profile: true,
        output_path: Some(blocker.join("profile.heapprofile")),
        ..Default::default()
    };
    let (transport, heap) = in_process_backend();
    let mut pipeline = TaskPipeline::new();
    ProfilingCoordinator::from_options(&options, transport)
        .unwrap()
        .apply(&mut pipeline)
        .unwrap();

    let report = pipeline.run(|| async { "output intact" }).await;

    assert_eq!(report.output, "output intact");
    assert_eq!(report.hook_failures.len(), 1);
    assert_eq!(report.hook_failures[0].phase, HookPhase::AfterCompletion);
    assert!(matches!(report.hook_failures[0].error, ProfilingError::Teardown { .. }));
    // disable still ran
    assert!(!heap.is_enabled());
}

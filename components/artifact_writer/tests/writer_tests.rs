//! Tests for ArtifactWriter on in-memory and filesystem storage

use artifact_writer::{ArtifactWriter, FsStorage, MemoryStorage, StorageError};
use futures::stream;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[test]
fn test_bare_filename_creates_no_directory() {
    let storage = MemoryStorage::new();
    let writer = ArtifactWriter::new(Arc::new(storage.clone()));

    tokio_test::block_on(
        writer.write_json(Path::new("v8-heap-sample.heapprofile"), &json!({"head": {}})),
    )
    .unwrap();

    assert!(storage.created_dirs().is_empty());
    assert!(storage.get("v8-heap-sample.heapprofile").is_some());
}

#[tokio::test]
async fn test_nested_path_creates_directory_once() {
    let storage = MemoryStorage::new();
    let writer = ArtifactWriter::new(Arc::new(storage.clone()));
    let path = Path::new("out/sub/profile.heapprofile");

    writer.write_json(path, &json!({"attempt": 1})).await.unwrap();
    writer.write_json(path, &json!({"attempt": 2})).await.unwrap();

    assert_eq!(storage.created_dirs(), vec![PathBuf::from("out/sub")]);
    let stored: Value = serde_json::from_str(&storage.get_string(path).unwrap()).unwrap();
    assert_eq!(stored, json!({"attempt": 2}));
}

#[tokio::test]
async fn test_json_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("sub").join("profile.heapprofile");
    let payload = json!({
        "head": {
            "callFrame": {"functionName": "(root)", "scriptId": "0", "url": "", "lineNumber": -1, "columnNumber": -1},
            "selfSize": 0,
            "id": 1,
            "children": []
        },
        "samples": [{"size": 128, "nodeId": 1, "ordinal": 1}]
    });

    let writer = ArtifactWriter::filesystem();
    let written = writer.write_json(&path, &payload).await.unwrap();

    assert!(path.parent().unwrap().is_dir());
    let parsed: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(parsed, payload);
    assert_eq!(written.bytes, std::fs::metadata(&path).unwrap().len());
}

#[tokio::test]
async fn test_write_replaces_previous_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifact.json");
    std::fs::write(&path, "a much longer previous artifact body").unwrap();

    ArtifactWriter::filesystem()
        .write_bytes(&path, b"{}")
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    // No staging file is left behind
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_stream_written_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshots").join("run.heapsnapshot");
    let chunks = stream::iter(
        ["{\"snapshot\":", "{\"node_count\":1}", "}"]
            .into_iter()
            .map(|chunk| Ok::<_, StorageError>(chunk.to_string())),
    );

    let written = ArtifactWriter::filesystem()
        .write_stream(&path, chunks)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "{\"snapshot\":{\"node_count\":1}}"
    );
    assert_eq!(written.bytes, 29);
}

#[derive(Debug)]
enum CaptureError {
    Interrupted,
    Storage(StorageError),
}

impl From<StorageError> for CaptureError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

#[tokio::test]
async fn test_failed_stream_leaves_previous_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.heapsnapshot");
    std::fs::write(&path, "previous").unwrap();

    let chunks = stream::iter(vec![
        Ok("{\"snapshot\":".to_string()),
        Err(CaptureError::Interrupted),
    ]);

    let result = ArtifactWriter::filesystem().write_stream(&path, chunks).await;

    assert!(matches!(result, Err(CaptureError::Interrupted)));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_directory_creation_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file in the way").unwrap();

    let writer = ArtifactWriter::new(Arc::new(FsStorage::new()));
    let err = writer
        .write_json(&blocker.join("profile.heapprofile"), &json!({}))
        .await
        .unwrap_err();

    match err {
        StorageError::CreateDir { path, .. } => assert_eq!(path, blocker),
        other => panic!("Expected CreateDir error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_removed_directory_is_created_again() {
    let storage = MemoryStorage::new();
    let writer = ArtifactWriter::new(Arc::new(storage.clone()));
    let path = Path::new("dist/v8-heap-sample.heapprofile");

    writer.write_json(path, &json!({"run": 1})).await.unwrap();
    storage.remove_dir("dist");
    assert!(storage.get(path).is_none());

    writer.write_json(path, &json!({"run": 2})).await.unwrap();

    assert_eq!(
        storage.created_dirs(),
        vec![PathBuf::from("dist"), PathBuf::from("dist")]
    );
    let stored: Value = serde_json::from_str(&storage.get_string(path).unwrap()).unwrap();
    assert_eq!(stored, json!({"run": 2}));
}

#[tokio::test]
async fn test_removed_directory_is_created_again_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let dist = dir.path().join("dist");
    let path = dist.join("v8-heap-sample.heapprofile");
    let writer = ArtifactWriter::filesystem();

    writer.write_json(&path, &json!({"run": 1})).await.unwrap();
    std::fs::remove_dir_all(&dist).unwrap();

    writer.write_json(&path, &json!({"run": 2})).await.unwrap();

    let parsed: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(parsed, json!({"run": 2}));
}

#[tokio::test]
async fn test_failed_rename_leaves_no_staging_file() {
    let dir = tempfile::tempdir().unwrap();
    // A directory sitting at the destination makes the final rename fail
    let path = dir.path().join("artifact.json");
    std::fs::create_dir(&path).unwrap();

    let err = ArtifactWriter::filesystem()
        .write_bytes(&path, b"{}")
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Write { .. }));
    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("artifact.json")]);
}

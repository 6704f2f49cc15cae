//! Storage backends for artifacts

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Where artifacts are persisted
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create `path` and any missing parents; succeeds if it already exists
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Replace the contents of `path` with `contents`
    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Open `path` for incremental writing
    ///
    /// Previous contents are only replaced once the sink is closed.
    async fn open_sink(&self, path: &Path) -> io::Result<Box<dyn ArtifactSink>>;
}

/// An open artifact receiving chunks in order
#[async_trait]
pub trait ArtifactSink: Send {
    /// Append `chunk`
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Finish the artifact, making it visible at its path
    async fn close(self: Box<Self>) -> io::Result<()>;

    /// Discard everything written so far
    async fn abort(self: Box<Self>);
}

/// Local filesystem storage
///
/// Writes go to a hidden sibling file that is renamed over the destination,
/// so a reader never observes a half-written artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl FsStorage {
    /// Create a filesystem storage
    pub fn new() -> Self {
        Self
    }

    fn staging_path(path: &Path) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(path.file_name().unwrap_or_default());
        name.push(".partial");
        path.with_file_name(name)
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let staging = Self::staging_path(path);
        let result = match fs::write(&staging, contents).await {
            Ok(()) => fs::rename(&staging, path).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = fs::remove_file(&staging).await;
        }
        result
    }

    async fn open_sink(&self, path: &Path) -> io::Result<Box<dyn ArtifactSink>> {
        let staging = Self::staging_path(path);
        let file = fs::File::create(&staging).await?;
        debug!("Opened {} for streaming", staging.display());
        Ok(Box::new(FsSink {
            writer: BufWriter::new(file),
            staging,
            destination: path.to_path_buf(),
        }))
    }
}

struct FsSink {
    writer: BufWriter<fs::File>,
    staging: PathBuf,
    destination: PathBuf,
}

#[async_trait]
impl ArtifactSink for FsSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn close(self: Box<Self>) -> io::Result<()> {
        let mut sink = self;
        sink.writer.flush().await?;
        sink.writer.get_ref().sync_all().await?;
        let result = fs::rename(&sink.staging, &sink.destination).await;
        if result.is_err() {
            let _ = fs::remove_file(&sink.staging).await;
        }
        result
    }

    async fn abort(self: Box<Self>) {
        let staging = self.staging.clone();
        drop(self);
        if let Err(e) = fs::remove_file(&staging).await {
            warn!("Failed to remove {}: {}", staging.display(), e);
        }
    }
}

/// In-memory storage, useful for tests and for hosts that ship artifacts elsewhere
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<DashMap<PathBuf, Vec<u8>>>,
    dirs: Arc<Mutex<HashSet<PathBuf>>>,
    created_dirs: Arc<Mutex<Vec<PathBuf>>>,
}

impl MemoryStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents stored at `path`
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.get(path.as_ref()).map(|entry| entry.value().clone())
    }

    /// Contents stored at `path` as UTF-8
    pub fn get_string(&self, path: impl AsRef<Path>) -> Option<String> {
        self.get(path).and_then(|bytes| String::from_utf8(bytes).ok())
    }

    /// Paths that hold an artifact
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Directories that did not exist when creation was requested, in order
    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.created_dirs.lock().clone()
    }

    /// Forget `path` and everything stored below it, like `remove_dir_all`
    pub fn remove_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.dirs.lock().retain(|dir| !dir.starts_with(path));
        self.files.retain(|file, _| !file.starts_with(path));
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        if self.dirs.lock().insert(path.to_path_buf()) {
            self.created_dirs.lock().push(path.to_path_buf());
        }
        Ok(())
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn open_sink(&self, path: &Path) -> io::Result<Box<dyn ArtifactSink>> {
        Ok(Box::new(MemorySink {
            files: Arc::clone(&self.files),
            destination: path.to_path_buf(),
            buffer: Vec::new(),
        }))
    }
}

struct MemorySink {
    files: Arc<DashMap<PathBuf, Vec<u8>>>,
    destination: PathBuf,
    buffer: Vec<u8>,
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn close(self: Box<Self>) -> io::Result<()> {
        let MemorySink {
            files,
            destination,
            buffer,
        } = *self;
        files.insert(destination, buffer);
        Ok(())
    }

    async fn abort(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        assert_eq!(
            FsStorage::staging_path(Path::new("out/profile.heapprofile")),
            PathBuf::from("out/.profile.heapprofile.partial")
        );
        assert_eq!(
            FsStorage::staging_path(Path::new("profile.heapprofile")),
            PathBuf::from(".profile.heapprofile.partial")
        );
    }

    #[tokio::test]
    async fn test_memory_sink_visible_only_after_close() {
        let storage = MemoryStorage::new();
        let mut sink = storage.open_sink(Path::new("a.heapsnapshot")).await.unwrap();
        sink.write_chunk(b"ab").await.unwrap();
        sink.write_chunk(b"cd").await.unwrap();
        assert!(storage.get("a.heapsnapshot").is_none());

        sink.close().await.unwrap();
        assert_eq!(storage.get_string("a.heapsnapshot").unwrap(), "abcd");
    }
}

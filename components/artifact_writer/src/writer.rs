//! Artifact writer

use futures::{Stream, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::storage::{FsStorage, Storage};

/// An artifact that reached storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    /// Where it was written
    pub path: PathBuf,
    /// Number of bytes written
    pub bytes: u64,
}

/// Persists artifacts, creating missing parent directories first
///
/// Parent directories are only created for paths that contain a separator;
/// a bare file name is written straight into the working directory. The
/// parent is checked on every write, so a directory removed between cycles
/// is created again.
#[derive(Clone)]
pub struct ArtifactWriter {
    storage: Arc<dyn Storage>,
}

impl ArtifactWriter {
    /// Create a writer on top of `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Create a writer on the local filesystem
    pub fn filesystem() -> Self {
        Self::new(Arc::new(FsStorage::new()))
    }

    /// Replace the contents of `path` with `contents`
    pub async fn write_bytes(&self, path: &Path, contents: &[u8]) -> Result<WrittenArtifact> {
        self.ensure_parent_dir(path).await?;
        self.storage
            .write(path, contents)
            .await
            .map_err(|source| StorageError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        info!("Wrote {} ({} bytes)", path.display(), contents.len());
        Ok(WrittenArtifact {
            path: path.to_path_buf(),
            bytes: contents.len() as u64,
        })
    }

    /// Serialize `value` as UTF-8 JSON and write it to `path`
    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<WrittenArtifact> {
        let contents = serde_json::to_vec(value).map_err(|source| StorageError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_bytes(path, &contents).await
    }

    /// Write the chunks produced by `chunks` to `path`, in order
    ///
    /// Chunks are written as they arrive and never collected in memory. If the
    /// stream yields an error the partial artifact is discarded and the error
    /// is returned.
    pub async fn write_stream<S, E>(
        &self,
        path: &Path,
        chunks: S,
    ) -> std::result::Result<WrittenArtifact, E>
    where
        S: Stream<Item = std::result::Result<String, E>>,
        E: From<StorageError>,
    {
        self.ensure_parent_dir(path).await?;

        let write_error = |source: std::io::Error| StorageError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut sink = self.storage.open_sink(path).await.map_err(write_error)?;
        let mut bytes = 0u64;
        let mut chunk_count = 0usize;

        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    sink.abort().await;
                    return Err(e);
                }
            };

            if let Err(source) = sink.write_chunk(chunk.as_bytes()).await {
                sink.abort().await;
                return Err(write_error(source).into());
            }
            bytes += chunk.len() as u64;
            chunk_count += 1;
        }

        sink.close().await.map_err(write_error)?;
        info!(
            "Wrote {} ({} bytes in {} chunks)",
            path.display(),
            bytes,
            chunk_count
        );
        Ok(WrittenArtifact {
            path: path.to_path_buf(),
            bytes,
        })
    }

    async fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        let Some(dir) = parent_dir(path) else {
            return Ok(());
        };

        debug!("Ensuring directory {}", dir.display());
        self.storage
            .create_dir_all(dir)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })
    }
}

impl std::fmt::Debug for ArtifactWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactWriter").finish_non_exhaustive()
    }
}

/// Whether `path` names a location inside some directory
pub fn has_separator(path: &Path) -> bool {
    path.to_string_lossy()
        .contains(|c: char| c == '/' || c == '\\')
}

/// Directory that has to exist before `path` can be written, if any
fn parent_dir(path: &Path) -> Option<&Path> {
    if !has_separator(path) {
        return None;
    }
    path.parent().filter(|dir| !dir.as_os_str().is_empty())
}

//! Artifact persistence
//!
//! [`ArtifactWriter`] resolves the parent directory of an artifact, creates
//! it when missing, and writes the artifact in full or chunk by chunk through
//! a [`Storage`] backend.
//!
//! # Example
//!
//! ```no_run
//! use artifact_writer::ArtifactWriter;
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), artifact_writer::StorageError> {
//! let writer = ArtifactWriter::filesystem();
//! writer
//!     .write_json(Path::new("out/profile.heapprofile"), &serde_json::json!({"head": {}}))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod storage;
mod writer;

pub use error::{Result, StorageError};
pub use storage::{ArtifactSink, FsStorage, MemoryStorage, Storage};
pub use writer::{has_separator, ArtifactWriter, WrittenArtifact};

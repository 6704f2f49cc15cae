//! Artifacts produced by instrumentation modes

use artifact_writer::{ArtifactWriter, WrittenArtifact};
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

use crate::error::Result;
use crate::mode::ModeKind;

/// The payload of an artifact
pub enum ArtifactPayload<'s> {
    /// A complete JSON document returned by the stop command
    Json(Value),
    /// Text chunks produced while the capture command runs
    ///
    /// Nothing is requested from the endpoint until the stream is polled.
    Chunks(BoxStream<'s, Result<String>>),
}

impl fmt::Debug for ArtifactPayload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactPayload::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ArtifactPayload::Chunks(_) => f.write_str("Chunks(..)"),
        }
    }
}

/// A mode's output together with its destination
#[derive(Debug)]
pub struct Artifact<'s> {
    /// Mode that produced it
    pub kind: ModeKind,
    /// Destination path
    pub path: PathBuf,
    /// Contents
    pub payload: ArtifactPayload<'s>,
}

impl<'s> Artifact<'s> {
    /// A JSON artifact
    pub fn json(kind: ModeKind, path: impl Into<PathBuf>, value: Value) -> Self {
        Self {
            kind,
            path: path.into(),
            payload: ArtifactPayload::Json(value),
        }
    }

    /// A streamed artifact
    pub fn chunks(
        kind: ModeKind,
        path: impl Into<PathBuf>,
        chunks: BoxStream<'s, Result<String>>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            payload: ArtifactPayload::Chunks(chunks),
        }
    }

    /// Persist the artifact through `writer`
    pub async fn write(self, writer: &ArtifactWriter) -> Result<WrittenArtifact> {
        match self.payload {
            ArtifactPayload::Json(value) => Ok(writer.write_json(&self.path, &value).await?),
            ArtifactPayload::Chunks(chunks) => writer.write_stream(&self.path, chunks).await,
        }
    }
}

//! Error types for the profiling coordinator

use instrumentation::{ModeError, ModeKind};
use protocol_session::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid profiling configuration, detected when the configuration is built
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// Peak memory interval is zero or negative
    #[error("checkPeakMemoryIntervalMs must be greater than 0, got {0}")]
    InvalidInterval(i64),

    /// Command timeout of zero would fail every command
    #[error("commandTimeoutMs must be greater than 0")]
    ZeroTimeout,

    /// An output path was supplied but empty
    #[error("Output path for {0} is empty")]
    EmptyPath(ModeKind),

    /// Two enabled modes would overwrite each other's artifact
    #[error("{first} and {second} would both write to {}", .path.display())]
    PathConflict {
        /// Mode started first
        first: ModeKind,
        /// Mode started second
        second: ModeKind,
        /// Shared path
        path: PathBuf,
    },

    /// Options text was not valid JSON
    #[error("Invalid options: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One failed step of after-completion
#[derive(Error, Debug)]
pub enum TeardownFailure {
    /// A mode could not be stopped or its artifact not written
    #[error("{mode}: {source}")]
    Mode {
        /// Mode that failed
        mode: ModeKind,
        /// What went wrong
        #[source]
        source: ModeError,
    },

    /// `HeapProfiler.disable` failed
    #[error("disable: {0}")]
    Disable(#[source] ProtocolError),
}

/// Errors surfaced through the pipeline's hook failure channel
#[derive(Error, Debug)]
pub enum ProfilingError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The session could not be enabled
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A mode failed to start; modes started before it were rolled back
    #[error("Failed to start {mode}: {source}")]
    Start {
        /// Mode that failed
        mode: ModeKind,
        /// What went wrong
        #[source]
        source: ModeError,
    },

    /// before-run fired again before after-completion
    #[error("A profiling cycle is already active")]
    CycleAlreadyActive,

    /// One or more after-completion steps failed; the others still ran
    #[error("{} teardown step(s) failed: {}", .failures.len(), summarize(.failures))]
    Teardown {
        /// Every failed step, in the order it ran
        failures: Vec<TeardownFailure>,
    },
}

fn summarize(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, ProfilingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigurationError::InvalidInterval(0);
        assert_eq!(
            err.to_string(),
            "checkPeakMemoryIntervalMs must be greater than 0, got 0"
        );

        let err = ConfigurationError::PathConflict {
            first: ModeKind::SamplingProfile,
            second: ModeKind::HeapSnapshot,
            path: PathBuf::from("out/heap.json"),
        };
        assert_eq!(
            err.to_string(),
            "sampling profile and heap snapshot would both write to out/heap.json"
        );

        let err = ProfilingError::CycleAlreadyActive;
        assert_eq!(err.to_string(), "A profiling cycle is already active");
    }

    #[test]
    fn test_teardown_lists_failures() {
        let err = ProfilingError::Teardown {
            failures: vec![
                TeardownFailure::Disable(ProtocolError::Closed("HeapProfiler.disable".into())),
            ],
        };
        assert_eq!(
            err.to_string(),
            "1 teardown step(s) failed: disable: Connection closed before HeapProfiler.disable completed"
        );
    }
}

//! Error types for instrumentation modes

use artifact_writer::StorageError;
use protocol_session::ProtocolError;
use thiserror::Error;

use crate::mode::{ModeKind, ModeState};

/// Errors raised by an instrumentation mode
#[derive(Error, Debug)]
pub enum ModeError {
    /// The requested transition is not valid from the current state
    #[error("{mode} cannot {action} while {state}")]
    InvalidState {
        /// Mode that was asked
        mode: ModeKind,
        /// What it was asked to do
        action: &'static str,
        /// State it was in
        state: ModeState,
    },

    /// A protocol command failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The artifact could not be persisted
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for instrumentation modes
pub type Result<T> = std::result::Result<T, ModeError>;

//! Error types for the protocol session

use cdp_types::CdpError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the introspection endpoint
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The endpoint answered the command with an error
    #[error("{method} failed: {source}")]
    Command {
        /// Fully qualified method name
        method: String,
        /// Error returned by the endpoint
        #[source]
        source: CdpError,
    },

    /// A command was sent before `HeapProfiler.enable` succeeded
    #[error("Session is not enabled, cannot send {0}")]
    NotEnabled(String),

    /// The command did not complete within the configured timeout
    #[error("{method} timed out after {timeout:?}")]
    Timeout {
        /// Fully qualified method name
        method: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The connection went away before the reply arrived
    #[error("Connection closed before {0} completed")]
    Closed(String),

    /// The reply did not have the expected shape
    #[error("Unexpected reply to {method}: {details}")]
    UnexpectedReply {
        /// Fully qualified method name
        method: String,
        /// What was wrong with it
        details: String,
    },

    /// WebSocket error (boxed to reduce size)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Wrap an endpoint error for `method`
    pub fn command(method: impl Into<String>, source: CdpError) -> Self {
        Self::Command {
            method: method.into(),
            source,
        }
    }

    /// The endpoint error code, when the endpoint rejected the command
    pub fn cdp_code(&self) -> Option<i32> {
        match self {
            Self::Command { source, .. } => Some(source.code),
            _ => None,
        }
    }
}

/// Result type for protocol session operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::command("HeapProfiler.stopSampling", CdpError::invalid_request());
        assert_eq!(
            err.to_string(),
            "HeapProfiler.stopSampling failed: CDP Error -32600: Invalid Request"
        );
        assert_eq!(err.cdp_code(), Some(-32600));

        let err = ProtocolError::NotEnabled("HeapProfiler.startSampling".to_string());
        assert_eq!(
            err.to_string(),
            "Session is not enabled, cannot send HeapProfiler.startSampling"
        );
        assert_eq!(err.cdp_code(), None);
    }
}

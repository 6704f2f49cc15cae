// Error objects returned by the inspector, using JSON-RPC 2.0 codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest code of the implementation-defined server error range
pub const SERVER_ERROR_MIN: i32 = -32099;
/// Highest code of the implementation-defined server error range
pub const SERVER_ERROR_MAX: i32 = -32000;

/// CDP Error following JSON-RPC 2.0 error specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CdpError {
    /// Error code (JSON-RPC standard codes)
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for CdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CDP Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for CdpError {}

impl CdpError {
    /// Create a new CDP error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create error with additional data
    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Invalid request (-32600)
    ///
    /// The inspector answers with this code when a command is not valid in
    /// the current state, e.g. `stopSampling` while not sampling.
    pub fn invalid_request() -> Self {
        Self::new(-32600, "Invalid Request")
    }

    /// Method not found (-32601)
    pub fn method_not_found(method: impl Into<String>) -> Self {
        let method = method.into();
        Self::with_data(
            -32601,
            "Method not found",
            serde_json::json!({ "method": method }),
        )
    }

    /// Invalid params (-32602)
    pub fn invalid_params(details: impl Into<String>) -> Self {
        let details = details.into();
        Self::with_data(
            -32602,
            "Invalid params",
            serde_json::json!({ "details": details }),
        )
    }

    /// Server error (-32000 to -32099)
    ///
    /// Codes outside the reserved range are clamped into it.
    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Self::new(code.clamp(SERVER_ERROR_MIN, SERVER_ERROR_MAX), message)
    }
}

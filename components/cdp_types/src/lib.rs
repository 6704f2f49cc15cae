// CDP protocol types, events, and error definitions
//
// Wire-level messages exchanged with a heap introspection endpoint.

pub mod domains;
pub mod errors;

// Re-export commonly used types
pub use errors::CdpError;

use serde::{Deserialize, Serialize};

/// CDP Request message
/// Represents a command sent to the introspection endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CdpRequest {
    /// Unique identifier for this request
    pub id: u64,
    /// Method name in format "Domain.method"
    pub method: String,
    /// Optional parameters for the method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl CdpRequest {
    /// Create a request for `method` with optional params
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// CDP Response message
/// Represents the reply to a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CdpResponse {
    /// Request ID this response corresponds to
    pub id: u64,
    /// Result of the method call (if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information (if method failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<errors::CdpError>,
}

impl CdpResponse {
    /// Collapse the response into the command outcome
    ///
    /// A response carrying neither a result nor an error is treated as an
    /// empty object, which is what acknowledgement-only commands return.
    pub fn into_result(self) -> Result<serde_json::Value, CdpError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(serde_json::json!({})),
        }
    }
}

/// CDP Event message
/// Represents an unsolicited event emitted by the endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CdpEvent {
    /// Event name in format "Domain.event"
    pub method: String,
    /// Event parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

impl CdpEvent {
    /// Create an event with the given params
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Generic CDP Message that can be request, response, or event
/// Useful for parsing incoming messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CdpMessage {
    /// A request message (has id and method)
    Request(CdpRequest),
    /// A response message (has id and result/error)
    Response(CdpResponse),
    /// An event message (has method but no id)
    Event(CdpEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_basic() {
        let request = CdpRequest::new(1, "HeapProfiler.enable", None);

        assert_eq!(request.id, 1);
        assert_eq!(request.method, "HeapProfiler.enable");
        assert!(request.params.is_none());
    }

    #[test]
    fn test_response_into_result() {
        let response = CdpResponse {
            id: 1,
            result: Some(json!({"profile": {}})),
            error: None,
        };
        assert_eq!(response.into_result().unwrap(), json!({"profile": {}}));

        let failed = CdpResponse {
            id: 2,
            result: None,
            error: Some(CdpError::invalid_request()),
        };
        assert_eq!(failed.into_result().unwrap_err().code, -32600);

        let empty = CdpResponse {
            id: 3,
            result: None,
            error: None,
        };
        assert_eq!(empty.into_result().unwrap(), json!({}));
    }

    #[test]
    fn test_event_without_params() {
        let event: CdpEvent =
            serde_json::from_str(r#"{"method":"HeapProfiler.resetProfiles"}"#).unwrap();
        assert_eq!(event.method, "HeapProfiler.resetProfiles");
        assert!(event.params.is_null());
    }
}

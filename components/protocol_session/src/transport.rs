//! Transport abstraction and message codec helpers

use async_trait::async_trait;
use cdp_types::{CdpError, CdpMessage};
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::event_bus::EventStream;

/// A request/response channel to an introspection endpoint
///
/// Implementations correlate each command with its reply and deliver
/// out-of-band events, in arrival order, to subscribers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `method` with optional params and wait for the reply
    async fn send(&self, method: &str, params: Option<Value>) -> Result<Value>;

    /// Subscribe to events named `event`
    ///
    /// Events emitted before the subscription was made are not replayed.
    fn subscribe(&self, event: &str) -> EventStream;
}

/// Trait implemented by in-process domain backends
///
/// A handler owns one protocol domain (e.g. "HeapProfiler") and answers the
/// methods within it.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Returns the name of this domain
    fn name(&self) -> &str;

    /// Handle a method call for this domain
    ///
    /// # Arguments
    /// * `method` - The method name without domain prefix, e.g. "startSampling"
    /// * `params` - Optional parameters for the method
    async fn handle_method(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, CdpError>;
}

/// Parse a CDP message from JSON string
pub fn parse_cdp_message(json: &str) -> Result<CdpMessage> {
    serde_json::from_str(json)
        .map_err(|e| ProtocolError::InvalidMessage(format!("Failed to parse CDP message: {}", e)))
}

/// Serialize a CDP message to JSON string
pub fn serialize_cdp_message(message: &CdpMessage) -> Result<String> {
    serde_json::to_string(message).map_err(ProtocolError::from)
}

/// Split `Domain.method` into its two halves
pub fn split_method(method: &str) -> std::result::Result<(&str, &str), CdpError> {
    match method.split_once('.') {
        Some((domain, name)) if !domain.is_empty() && !name.is_empty() => Ok((domain, name)),
        _ => Err(CdpError::invalid_request()),
    }
}

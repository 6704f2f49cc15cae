//! In-process transport routing commands to registered domain handlers

use async_trait::async_trait;
use cdp_types::CdpError;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};
use crate::event_bus::{EventBus, EventStream};
use crate::transport::{split_method, DomainHandler, Transport};

/// Transport that dispatches commands to domain handlers living in this process
///
/// Handlers publish events through the bus returned by [`LocalTransport::event_bus`],
/// which is the same bus subscribers read from.
pub struct LocalTransport {
    /// Registry of domain handlers, keyed by domain name
    domains: Arc<DashMap<String, Arc<dyn DomainHandler>>>,
    /// Events emitted by the handlers
    events: EventBus,
}

impl LocalTransport {
    /// Create a transport with no domains registered
    pub fn new() -> Self {
        Self {
            domains: Arc::new(DashMap::new()),
            events: EventBus::new(),
        }
    }

    /// Register a domain handler, replacing any handler of the same name
    pub fn register_domain(&self, handler: Arc<dyn DomainHandler>) {
        let name = handler.name().to_string();
        debug!("Registering domain handler: {}", name);
        self.domains.insert(name, handler);
    }

    /// Unregister a domain handler
    pub fn unregister_domain(&self, domain_name: &str) -> Option<Arc<dyn DomainHandler>> {
        debug!("Unregistering domain handler: {}", domain_name);
        self.domains.remove(domain_name).map(|(_, v)| v)
    }

    /// Bus the registered handlers should publish their events to
    pub fn event_bus(&self) -> EventBus {
        self.events.clone()
    }

    /// Names of the registered domains
    pub fn registered_domains(&self) -> Vec<String> {
        self.domains.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn route(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, CdpError> {
        let (domain_name, method_name) = split_method(method).map_err(|e| {
            warn!("Invalid method format (expected Domain.method): {}", method);
            e
        })?;

        let handler = self
            .domains
            .get(domain_name)
            .ok_or_else(|| {
                warn!("Domain not found: {}", domain_name);
                CdpError::method_not_found(method)
            })?
            .clone();

        handler.handle_method(method_name, params).await
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        debug!("Routing {} to local domain", method);
        self.route(method, params)
            .await
            .map_err(|e| ProtocolError::command(method, e))
    }

    fn subscribe(&self, event: &str) -> EventStream {
        self.events.subscribe(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_types::CdpEvent;
    use serde_json::json;

    struct EchoDomain {
        events: EventBus,
    }

    #[async_trait]
    impl DomainHandler for EchoDomain {
        fn name(&self) -> &str {
            "Echo"
        }

        async fn handle_method(
            &self,
            method: &str,
            params: Option<Value>,
        ) -> std::result::Result<Value, CdpError> {
            match method {
                "echo" => Ok(params.unwrap_or(json!(null))),
                "announce" => {
                    self.events.publish(CdpEvent::new("Echo.announced", json!({"n": 1})));
                    Ok(json!({}))
                }
                _ => Err(CdpError::method_not_found(format!("Echo.{}", method))),
            }
        }
    }

    fn transport_with_echo() -> LocalTransport {
        let transport = LocalTransport::new();
        transport.register_domain(Arc::new(EchoDomain {
            events: transport.event_bus(),
        }));
        transport
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let transport = transport_with_echo();
        assert_eq!(transport.registered_domains(), vec!["Echo".to_string()]);

        assert!(transport.unregister_domain("Echo").is_some());
        assert!(transport.registered_domains().is_empty());
    }

    #[tokio::test]
    async fn test_send_routes_to_domain() {
        let transport = transport_with_echo();
        let reply = transport
            .send("Echo.echo", Some(json!({"value": 42})))
            .await
            .unwrap();
        assert_eq!(reply["value"], 42);
    }

    #[tokio::test]
    async fn test_unknown_domain() {
        let transport = LocalTransport::new();
        let err = transport.send("Missing.method", None).await.unwrap_err();
        assert_eq!(err.cdp_code(), Some(-32601));
    }

    #[tokio::test]
    async fn test_invalid_method_format() {
        let transport = transport_with_echo();
        let err = transport.send("EchoWithoutDot", None).await.unwrap_err();
        assert_eq!(err.cdp_code(), Some(-32600));
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let transport = transport_with_echo();
        let mut announced = transport.subscribe("Echo.announced");

        transport.send("Echo.announce", None).await.unwrap();

        let event = announced.try_recv().unwrap();
        assert_eq!(event.params["n"], 1);
    }
}

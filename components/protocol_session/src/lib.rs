//! Protocol session over a heap introspection endpoint
//!
//! This crate owns the connection side of heap profiling: a uniform
//! "send command, await reply" [`Transport`], ordered event subscriptions,
//! and the cycle-scoped [`ProtocolSession`] that brackets mode commands
//! between `HeapProfiler.enable` and `HeapProfiler.disable`.
//!
//! # Transports
//!
//! - [`LocalTransport`]: routes `Domain.method` to in-process [`DomainHandler`]s
//! - [`WebSocketTransport`]: CDP client for a remote inspector endpoint
//!
//! # Example
//!
//! ```no_run
//! use protocol_session::{ProtocolSession, WebSocketTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = WebSocketTransport::connect("ws://127.0.0.1:9229/target").await?;
//!     let session = ProtocolSession::new(Arc::new(transport));
//!     session.enable().await?;
//!     session.send("HeapProfiler.collectGarbage", None).await?;
//!     session.disable().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod event_bus;
pub mod local;
pub mod session;
pub mod transport;
pub mod websocket;

pub use error::{ProtocolError, Result};
pub use event_bus::{EventBus, EventStream};
pub use local::LocalTransport;
pub use session::{ProtocolSession, SessionId, SessionState};
pub use transport::{
    parse_cdp_message, serialize_cdp_message, split_method, DomainHandler, Transport,
};
pub use websocket::WebSocketTransport;
